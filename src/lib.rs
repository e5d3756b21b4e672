//! # MQ Gateway Library - Core Library Crate
//!
//! A discovery-backed TCP gateway for messaging protocols. Clients connect to
//! a stable address/port per wire protocol (OpenWire, STOMP, AMQP, MQTT,
//! WebSocket transport) and the gateway transparently forwards each
//! connection to one of a dynamically discovered pool of broker instances,
//! load-balancing across live backends and reacting to membership changes
//! without restart.
//!
//! ## Architecture Overview
//!
//! The gateway is built around several core modules:
//! - `core::error`: error taxonomy scoped per failure domain
//! - `core::config`: statically validated per-protocol configuration
//! - `discovery::service_map`: protocol key → live backend registry
//! - `discovery::source`: watch/read boundary over the coordination service
//! - `discovery::listener`: event-to-registry translation and lifecycle owner
//! - `load_balancing`: round-robin selection with per-protocol rotation
//! - `gateway`: per-protocol TCP listeners, byte forwarding, and the
//!   orchestrator that wires configuration into a running gateway group
//!
//! ## Rust Module System Explained (For Developers from Other Languages)
//!
//! Rust uses a hierarchical module system rooted at this file: `mod name;`
//! declares a module, `use path::item;` imports from it, and items are
//! private unless marked `pub`. The `pub use` re-exports below form the
//! crate's public API surface, so users can write `use mq_gateway::ServiceMap`
//! instead of spelling out the full module path.

/// Core functionality including error types, configuration, and shared data structures
pub mod core;

/// Service discovery: backend registry, coordination-service boundary, listener
pub mod discovery;

/// Protocol gateways, per-connection forwarding, and the orchestrator
pub mod gateway;

/// Load balancing strategies for distributing connections across backends
pub mod load_balancing;

/// Main error type used throughout the gateway
pub use crate::core::error::{GatewayError, GatewayResult};

/// Main configuration structures for the gateway
pub use crate::core::config::{MqGatewayConfig, ProtocolConfig};

/// Discovered backend entry and connection state machine
pub use crate::core::types::{ConnectionState, ServiceEntry};

/// Registry and discovery types needed by embedders
pub use crate::discovery::{DiscoverySource, GatewayListener, InMemoryDiscovery, ServiceMap};

/// Gateway group entry points
pub use crate::gateway::orchestrator::GatewayOrchestrator;
pub use crate::gateway::{Gateway, TcpGateway};
