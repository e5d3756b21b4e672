//! Protocol gateways: listening sockets, per-connection forwarding, and the
//! orchestrator wiring configuration into a running gateway group

pub mod connection;
pub mod orchestrator;
pub mod tcp;

pub use tcp::{Gateway, TcpGateway};
