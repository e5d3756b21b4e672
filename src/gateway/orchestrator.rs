//! # Gateway Orchestrator Module
//!
//! Wires per-protocol configuration into a running set of gateways: one
//! `TcpGateway` per enabled protocol, all sharing one `ServiceMap` and one
//! round-robin balancer, coordinated by a single `GatewayListener` over the
//! configured discovery path. The service map instance is owned here and
//! passed by reference to every gateway and the listener at construction;
//! there is no process-wide singleton.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::core::config::MqGatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::listener::GatewayListener;
use crate::discovery::service_map::ServiceMap;
use crate::discovery::source::DiscoverySource;
use crate::gateway::tcp::TcpGateway;
use crate::gateway::Gateway;
use crate::load_balancing::balancer::RoundRobinBalancer;

/// Activates and deactivates the per-protocol gateway group
pub struct GatewayOrchestrator {
    config: MqGatewayConfig,
    discovery: Arc<dyn DiscoverySource>,
    listener: Mutex<Option<Arc<GatewayListener>>>,
}

impl GatewayOrchestrator {
    pub fn new(config: MqGatewayConfig, discovery: Arc<dyn DiscoverySource>) -> Self {
        Self {
            config,
            discovery,
            listener: Mutex::new(None),
        }
    }

    /// Validate configuration and start the gateway group
    ///
    /// Zero enabled protocols is a normal no-op: activation succeeds and no
    /// listener is created. Only configuration validation failures surface as
    /// an activation error; a bind failure for one protocol is reported by
    /// the listener for that protocol only.
    pub async fn activate(&self) -> GatewayResult<()> {
        self.config.validate()?;

        if self.listener.lock().is_some() {
            return Err(GatewayError::config("orchestrator already activated"));
        }

        let service_map = Arc::new(ServiceMap::new());
        let balancer = Arc::new(RoundRobinBalancer::new());

        let gateways: Vec<Arc<dyn Gateway>> = self
            .config
            .enabled_protocols()
            .map(|protocol| {
                Arc::new(TcpGateway::new(
                    protocol.name.clone(),
                    self.config.host.clone(),
                    protocol.port,
                    service_map.clone(),
                    balancer.clone(),
                    self.config.connect_timeout,
                )) as Arc<dyn Gateway>
            })
            .collect();

        if gateways.is_empty() {
            info!("No messaging protocols enabled; gateway group not started");
            return Ok(());
        }

        info!(
            discovery_path = %self.config.discovery_path,
            gateways = gateways.len(),
            "Activating gateway group"
        );

        let listener = Arc::new(GatewayListener::new(
            self.discovery.clone(),
            self.config.discovery_path.clone(),
            service_map,
            gateways,
        ));
        listener.clone().init().await?;

        *self.listener.lock() = Some(listener);
        Ok(())
    }

    /// Stop the listener and, through it, every owned gateway
    ///
    /// Idempotent; deactivating a never-activated orchestrator is a no-op.
    pub async fn deactivate(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.destroy().await;
            info!("Gateway group deactivated");
        }
    }

    /// The running listener, if any
    pub fn listener(&self) -> Option<Arc<GatewayListener>> {
        self.listener.lock().clone()
    }

    pub fn config(&self) -> &MqGatewayConfig {
        &self.config
    }
}
