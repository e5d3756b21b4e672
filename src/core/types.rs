//! # Core Types Module
//!
//! This module defines the foundational data structures shared across the
//! gateway: discovered backend entries, the wire format brokers use to
//! announce themselves, and the per-connection state machine.
//!
//! ## Rust Ownership Concepts in This Module
//!
//! - `Clone` is derived on registry types so `snapshot()` can hand out
//!   independent point-in-time copies to concurrent connection handlers
//! - `serde` derives map the discovery payload directly onto typed structs

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};

/// One discovered backend endpoint for one protocol
///
/// Entries are exclusively owned by the `ServiceMap`: they are created on a
/// discovery ADDED event, replaced on UPDATED, and removed on REMOVED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Identifier of the discovery child node that announced this backend
    pub id: String,

    /// Connectable backend address as `host:port`
    pub address: String,

    /// Protocol key this endpoint terminates (e.g. "tcp", "stomp", "amqp")
    pub protocol_hint: String,

    /// Version of the discovery payload this entry was last seen in
    pub last_seen_version: u64,
}

impl fmt::Display for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.id, self.address, self.protocol_hint)
    }
}

/// Payload a broker publishes under the watched discovery path
///
/// Each transport URL advertises one protocol endpoint; the URL scheme is the
/// protocol key used to partition the `ServiceMap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendAnnouncement {
    /// Broker identifier (defaults to the discovery child id when absent)
    #[serde(default)]
    pub id: Option<String>,

    /// Transport URLs, one per protocol: `scheme://host:port`
    pub services: Vec<String>,
}

impl BackendAnnouncement {
    /// Parse an announcement from a raw discovery payload
    pub fn from_json(payload: &[u8]) -> GatewayResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| GatewayError::discovery(format!("malformed backend payload: {}", e)))
    }
}

/// A single `(protocol key, host:port)` endpoint parsed from a transport URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub protocol: String,
    pub address: String,
}

/// Parse one transport URL of the form `scheme://host:port`
///
/// The scheme becomes the protocol key. URLs without a host or a resolvable
/// port are rejected; callers skip and log them rather than failing the watch.
pub fn parse_transport_url(raw: &str) -> GatewayResult<ServiceEndpoint> {
    let url = Url::parse(raw)
        .map_err(|e| GatewayError::discovery(format!("invalid transport url '{}': {}", raw, e)))?;

    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::discovery(format!("transport url '{}' has no host", raw)))?;
    // port() is None for a special scheme at its default port (ws://h:80),
    // even when the port was explicit in the input
    let port = url
        .port_or_known_default()
        .ok_or_else(|| GatewayError::discovery(format!("transport url '{}' has no port", raw)))?;

    Ok(ServiceEndpoint {
        protocol: url.scheme().to_string(),
        address: format!("{}:{}", host, port),
    })
}

/// Per-connection state machine
///
/// A connection is created on accept in `Routing`, moves to `Proxying` once a
/// backend socket is established, and ends in `Closed` on full bidirectional
/// close or error. Routing failures skip `Proxying` entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Routing,
    Proxying,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Routing => write!(f, "ROUTING"),
            ConnectionState::Proxying => write!(f, "PROXYING"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_url() {
        let endpoint = parse_transport_url("tcp://broker-1.local:61616").unwrap();
        assert_eq!(endpoint.protocol, "tcp");
        assert_eq!(endpoint.address, "broker-1.local:61616");

        let endpoint = parse_transport_url("stomp://10.0.0.7:61613").unwrap();
        assert_eq!(endpoint.protocol, "stomp");
        assert_eq!(endpoint.address, "10.0.0.7:61613");

        // A special scheme at its default port still resolves the port
        let endpoint = parse_transport_url("ws://broker-1.local:80").unwrap();
        assert_eq!(endpoint.protocol, "ws");
        assert_eq!(endpoint.address, "broker-1.local:80");
    }

    #[test]
    fn test_parse_transport_url_rejects_missing_port() {
        assert!(parse_transport_url("tcp://broker-1.local").is_err());
        assert!(parse_transport_url("not a url").is_err());
    }

    #[test]
    fn test_announcement_from_json() {
        let payload = br#"{"id":"broker-1","services":["tcp://h:61616","stomp://h:61613"]}"#;
        let announcement = BackendAnnouncement::from_json(payload).unwrap();
        assert_eq!(announcement.id.as_deref(), Some("broker-1"));
        assert_eq!(announcement.services.len(), 2);

        assert!(BackendAnnouncement::from_json(b"{not json").is_err());
    }
}
