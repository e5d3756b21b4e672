//! # Error Handling Module
//!
//! This module provides the error types used throughout the MQ gateway using the
//! `thiserror` crate. Each variant corresponds to one failure domain, and the
//! blast radius of every domain is deliberately narrow: a failure local to one
//! connection or one protocol gateway must never affect sibling gateways or
//! established connections. Only configuration validation failures at
//! activation time are surfaced to the operator as an activation failure.
//!
//! ## Rust Error Handling Concepts (For Developers from Other Languages)
//!
//! Rust does not use exceptions. Fallible operations return `Result<T, E>`:
//! `Ok(value)` on success and `Err(error)` on failure. The `?` operator
//! propagates errors up the call stack explicitly, and `thiserror` derives
//! the `Display` and `Error` trait implementations from the `#[error("...")]`
//! attributes below.

use thiserror::Error;

/// Main result type used throughout the gateway
///
/// This is a type alias that makes error handling more ergonomic.
/// Instead of writing `Result<T, GatewayError>` everywhere, we can use `GatewayResult<T>`.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the MQ gateway
///
/// Each variant represents a different failure domain with its own scope:
/// configuration and bind errors are fatal only to the affected gateway's
/// activation, discovery errors never crash the process, and routing/proxy
/// errors terminate only the affected connection.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, unknown keys, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A listening port could not be bound; fatal only to that protocol's gateway
    #[error("Bind error for protocol '{protocol}' on {addr}: {message}")]
    Bind {
        protocol: String,
        addr: String,
        message: String,
    },

    /// Discovery backend errors (coordination service unreachable, watch failed, etc.)
    #[error("Discovery error: {message}")]
    Discovery { message: String },

    /// No live backend was available or every dial attempt failed; terminates one connection
    #[error("Routing error for protocol '{protocol}': {message}")]
    Routing { protocol: String, message: String },

    /// Mid-stream I/O failure while forwarding bytes; terminates one connection
    #[error("Proxy error: {message}")]
    Proxy { message: String },

    /// I/O errors outside an established proxy pair (file operations, socket setup, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a bind error for one protocol gateway
    pub fn bind<P: Into<String>, A: Into<String>, M: Into<String>>(
        protocol: P,
        addr: A,
        message: M,
    ) -> Self {
        Self::Bind {
            protocol: protocol.into(),
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// Create a discovery error with a custom message
    pub fn discovery<S: Into<String>>(message: S) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create a routing error for one connection
    pub fn routing<P: Into<String>, M: Into<String>>(protocol: P, message: M) -> Self {
        Self::Routing {
            protocol: protocol.into(),
            message: message.into(),
        }
    }

    /// Create a proxy error for one connection
    pub fn proxy<S: Into<String>>(message: S) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Get a string representation of the error type for logging and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Bind { .. } => "bind_error",
            Self::Discovery { .. } => "discovery_error",
            Self::Routing { .. } => "routing_error",
            Self::Proxy { .. } => "proxy_error",
            Self::Io { .. } => "io_error",
        }
    }

    /// Check if this error describes a transient condition
    ///
    /// "No backends yet" and broken dials are retryable by the next connection
    /// attempt; configuration and bind failures are permanent until the
    /// operator intervenes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Discovery { .. } => true,
            Self::Routing { .. } => true,
            Self::Proxy { .. } => true,
            Self::Io { .. } => true,
            Self::Configuration { .. } => false,
            Self::Bind { .. } => false,
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_json::Error
impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: format!("JSON error: {}", err),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: format!("YAML error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(
            GatewayError::config("bad port").error_type(),
            "configuration_error"
        );
        assert_eq!(
            GatewayError::bind("stomp", "0.0.0.0:61613", "address in use").error_type(),
            "bind_error"
        );
        assert_eq!(
            GatewayError::routing("tcp", "no backend available").error_type(),
            "routing_error"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::routing("tcp", "all dials failed").is_retryable());
        assert!(GatewayError::proxy("connection reset by peer").is_retryable());
        assert!(GatewayError::discovery("zk session lost").is_retryable());
        assert!(!GatewayError::config("unknown key").is_retryable());
        assert!(!GatewayError::bind("amqp", "0.0.0.0:5672", "in use").is_retryable());
    }

    #[test]
    fn test_error_display_includes_protocol() {
        let err = GatewayError::routing("mqtt", "no backend available");
        assert!(err.to_string().contains("mqtt"));
        assert!(err.to_string().contains("no backend available"));
    }
}
