//! # Configuration Module
//!
//! This module handles configuration for the MQ gateway: one record per
//! messaging protocol plus the shared discovery path and bind-host override.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Environment variable override support
//! - Statically validated at construction: unknown keys and duplicate
//!   protocol names are rejected before anything binds; port clashes are
//!   left to bind time, where they fail per protocol only
//! - The protocol set is an ordered descriptor list, so adding a protocol is
//!   a list entry rather than a new pair of config fields

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// Default ZooKeeper-style subtree whose children are the live brokers
pub const DEFAULT_DISCOVERY_PATH: &str = "/fabric/registry/clusters/fusemq";

/// Configuration for a single protocol listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Protocol key, also used to partition the service map (e.g. "stomp")
    pub name: String,

    /// Whether a listening socket is bound for this protocol
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Port to listen on
    pub port: u16,
}

fn default_enabled() -> bool {
    true
}

impl ProtocolConfig {
    pub fn new<S: Into<String>>(name: S, enabled: bool, port: u16) -> Self {
        Self {
            name: name.into(),
            enabled,
            port,
        }
    }
}

/// Main gateway configuration structure
///
/// Immutable after orchestrator activation. The defaults mirror the deployed
/// messaging stack: OpenWire on 61616, STOMP on 61613, AMQP and MQTT on 5672,
/// and the framed web transport on 61614.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MqGatewayConfig {
    /// Discovery subtree monitored for available message brokers
    #[serde(default = "default_discovery_path")]
    pub discovery_path: String,

    /// Optional host to bind the listening sockets on; `None` binds all interfaces
    #[serde(default)]
    pub host: Option<String>,

    /// Ordered list of protocol descriptors
    #[serde(default = "default_protocols")]
    pub protocols: Vec<ProtocolConfig>,

    /// Upper bound on a single backend dial attempt
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_discovery_path() -> String {
    DEFAULT_DISCOVERY_PATH.to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_protocols() -> Vec<ProtocolConfig> {
    vec![
        ProtocolConfig::new("tcp", true, 61616),
        ProtocolConfig::new("stomp", true, 61613),
        ProtocolConfig::new("amqp", true, 5672),
        ProtocolConfig::new("mqtt", true, 5672),
        ProtocolConfig::new("ws", true, 61614),
    ]
}

impl Default for MqGatewayConfig {
    fn default() -> Self {
        Self {
            discovery_path: default_discovery_path(),
            host: None,
            protocols: default_protocols(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl MqGatewayConfig {
    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: MqGatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub async fn load_from_json<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: MqGatewayConfig = serde_json::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Shared settings follow the pattern `MQ_GATEWAY_<FIELD>`; per-protocol
    /// settings use `MQ_GATEWAY_<PROTOCOL>_ENABLED` and
    /// `MQ_GATEWAY_<PROTOCOL>_PORT`, e.g. `MQ_GATEWAY_STOMP_PORT=61617`.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(path) = env::var("MQ_GATEWAY_DISCOVERY_PATH") {
            self.discovery_path = path;
        }

        if let Ok(host) = env::var("MQ_GATEWAY_HOST") {
            self.host = if host.is_empty() { None } else { Some(host) };
        }

        if let Ok(timeout) = env::var("MQ_GATEWAY_CONNECT_TIMEOUT") {
            self.connect_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                GatewayError::config(format!("Invalid MQ_GATEWAY_CONNECT_TIMEOUT: {}", e))
            })?;
        }

        for protocol in &mut self.protocols {
            let prefix = format!("MQ_GATEWAY_{}", protocol.name.to_uppercase());

            if let Ok(enabled) = env::var(format!("{}_ENABLED", prefix)) {
                protocol.enabled = enabled.parse().map_err(|e| {
                    GatewayError::config(format!("Invalid {}_ENABLED: {}", prefix, e))
                })?;
            }

            if let Ok(port) = env::var(format!("{}_PORT", prefix)) {
                protocol.port = port.parse().map_err(|e| {
                    GatewayError::config(format!("Invalid {}_PORT: {}", prefix, e))
                })?;
            }
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// Runs at construction so activation fails before any socket is bound.
    /// Enabled protocols may share a port (the defaults put amqp and mqtt
    /// both on 5672): the clash surfaces as a per-protocol bind failure at
    /// activation, never as a configuration error.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.discovery_path.trim().is_empty() {
            return Err(GatewayError::config("discovery_path must not be empty"));
        }

        let mut seen_names = std::collections::HashSet::new();

        for protocol in &self.protocols {
            if protocol.name.trim().is_empty() {
                return Err(GatewayError::config("protocol name must not be empty"));
            }

            if !seen_names.insert(protocol.name.clone()) {
                return Err(GatewayError::config(format!(
                    "duplicate protocol '{}'",
                    protocol.name
                )));
            }

            if protocol.enabled && protocol.port == 0 {
                return Err(GatewayError::config(format!(
                    "protocol '{}' must use a non-zero port",
                    protocol.name
                )));
            }
        }

        if self.connect_timeout.is_zero() {
            return Err(GatewayError::config("connect_timeout must be non-zero"));
        }

        Ok(())
    }

    /// Enabled protocol descriptors in configuration order
    pub fn enabled_protocols(&self) -> impl Iterator<Item = &ProtocolConfig> {
        self.protocols.iter().filter(|p| p.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MqGatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocols.len(), 5);
        assert_eq!(config.discovery_path, DEFAULT_DISCOVERY_PATH);
    }

    #[test]
    fn test_default_ports_mirror_broker_stack() {
        let config = MqGatewayConfig::default();
        let port_of = |name: &str| {
            config
                .protocols
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.port)
                .unwrap()
        };
        assert_eq!(port_of("tcp"), 61616);
        assert_eq!(port_of("stomp"), 61613);
        assert_eq!(port_of("amqp"), 5672);
        assert_eq!(port_of("mqtt"), 5672);
        assert_eq!(port_of("ws"), 61614);
    }

    #[test]
    fn test_shared_ports_are_not_a_config_error() {
        // Two enabled protocols on one port is legal configuration; the
        // second bind fails at activation for that protocol only.
        let config = MqGatewayConfig {
            protocols: vec![
                ProtocolConfig::new("amqp", true, 5672),
                ProtocolConfig::new("mqtt", true, 5672),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_protocols() {
        let config = MqGatewayConfig {
            protocols: vec![ProtocolConfig::new("", true, 61616)],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MqGatewayConfig {
            protocols: vec![
                ProtocolConfig::new("tcp", true, 61616),
                ProtocolConfig::new("tcp", false, 61617),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MqGatewayConfig {
            protocols: vec![ProtocolConfig::new("tcp", true, 0)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let yaml = "discovery_path: /clusters/mq\nbogus_setting: 1\n";
        let parsed: Result<MqGatewayConfig, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
discovery_path: /clusters/mq
host: 127.0.0.1
connect_timeout: 3s
protocols:
  - name: stomp
    enabled: true
    port: 61613
  - name: mqtt
    enabled: false
    port: 1883
"#;
        let config: MqGatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.discovery_path, "/clusters/mq");
        assert_eq!(config.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.enabled_protocols().count(), 1);
        assert!(config.validate().is_ok());
    }
}
