//! Service discovery: the registry of live backends, the coordination-service
//! boundary, and the listener translating membership events into registry
//! mutations

pub mod listener;
pub mod service_map;
pub mod source;

pub use listener::GatewayListener;
pub use service_map::ServiceMap;
pub use source::{ChildEvent, ChildEventKind, DiscoverySource, InMemoryDiscovery};
