//! Load balancing strategies for distributing connections across backends

pub mod balancer;

pub use balancer::RoundRobinBalancer;
