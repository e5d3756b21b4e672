//! # Gateway Listener Module
//!
//! Lifecycle coordinator between the discovery source and the protocol
//! gateways. The listener subscribes to one watched path, translates child
//! events into `ServiceMap` mutations, and owns the set of gateways so that
//! teardown happens in a safe order: unregister from discovery first, then
//! destroy the sockets, so no late mutation can race a gateway's teardown.
//!
//! Events for one path are consumed by a single sequential task, which keeps
//! `ServiceMap` mutation race-free at per-key granularity without a global
//! lock. A full resync burst from the source (all children REMOVED then
//! re-ADDED) is applied verbatim in arrival order; the worst case visible to
//! routing is one empty-window snapshot.

use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{parse_transport_url, BackendAnnouncement, ServiceEntry};
use crate::discovery::service_map::ServiceMap;
use crate::discovery::source::{ChildEvent, ChildEventKind, ChildNode, DiscoverySource};
use crate::gateway::Gateway;

/// Lifecycle states of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Init,
    Watching,
    Stopped,
}

/// Watches one discovery path and keeps the shared service map current
pub struct GatewayListener {
    discovery: Arc<dyn DiscoverySource>,
    path: String,
    service_map: Arc<ServiceMap>,
    gateways: Vec<Arc<dyn Gateway>>,
    state: Mutex<ListenerState>,
    shutdown: CancellationToken,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayListener {
    pub fn new(
        discovery: Arc<dyn DiscoverySource>,
        path: impl Into<String>,
        service_map: Arc<ServiceMap>,
        gateways: Vec<Arc<dyn Gateway>>,
    ) -> Self {
        Self {
            discovery,
            path: path.into(),
            service_map,
            gateways,
            state: Mutex::new(ListenerState::Init),
            shutdown: CancellationToken::new(),
            watch_task: Mutex::new(None),
        }
    }

    /// The service map this listener mutates
    pub fn service_map(&self) -> &Arc<ServiceMap> {
        &self.service_map
    }

    /// The gateways owned by this listener
    pub fn gateways(&self) -> &[Arc<dyn Gateway>] {
        &self.gateways
    }

    /// Register with the discovery source, prime the service map, and start
    /// the owned gateways
    ///
    /// Priming happens synchronously before any gateway binds, so the first
    /// connection after startup sees a populated map whenever backends
    /// already exist. The watch subscription is taken before the prime read;
    /// events raced against the prime replay as idempotent upserts.
    pub async fn init(self: Arc<Self>) -> GatewayResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ListenerState::Init => *state = ListenerState::Watching,
                ListenerState::Watching => {
                    warn!(path = %self.path, "Listener already watching; init ignored");
                    return Ok(());
                }
                ListenerState::Stopped => {
                    return Err(GatewayError::discovery("listener already stopped"));
                }
            }
        }

        let mut events = self.discovery.watch(&self.path).await?;

        let children = self.discovery.read_children(&self.path).await?;
        for child in &children {
            self.apply_announcement(&child.id, &child.payload, child.version);
        }
        info!(
            path = %self.path,
            children = children.len(),
            backends = self.service_map.len(),
            "Primed service map from discovery"
        );

        // A bind failure for one protocol is reported for that protocol only
        // and does not block activation of the other enabled protocols.
        let mut bound = 0usize;
        let mut last_bind_failure = None;
        for gateway in &self.gateways {
            match gateway.init().await {
                Ok(()) => bound += 1,
                Err(e) => {
                    error!(
                        protocol = %gateway.protocol(),
                        port = gateway.port(),
                        error = %e,
                        "Failed to start protocol gateway"
                    );
                    last_bind_failure = Some(e);
                }
            }
        }
        if !self.gateways.is_empty() && bound == 0 {
            // Nothing is listening, so the listener is over, not watching.
            *self.state.lock() = ListenerState::Stopped;
            self.shutdown.cancel();
            return Err(last_bind_failure
                .unwrap_or_else(|| GatewayError::discovery("no protocol gateway could be started")));
        }

        let listener = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = listener.shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => listener.apply_event(event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(path = %listener.path, missed = missed, "Discovery stream lagged; reconciling from a fresh read");
                            match listener.discovery.read_children(&listener.path).await {
                                Ok(children) => listener.reconcile(&children),
                                Err(e) => error!(path = %listener.path, error = %e, "Reconcile read failed"),
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            warn!(path = %listener.path, "Discovery stream closed");
                            break;
                        }
                    }
                }
            }
            debug!(path = %listener.path, "Discovery event loop stopped");
        });
        *self.watch_task.lock() = Some(task);

        info!(path = %self.path, gateways = bound, "Gateway listener watching");
        Ok(())
    }

    /// Unregister from discovery, then destroy every owned gateway
    ///
    /// Idempotent. Individual gateway failures are logged, never propagated,
    /// so one failing gateway cannot block shutdown of the others.
    pub async fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if *state == ListenerState::Stopped {
                return;
            }
            *state = ListenerState::Stopped;
        }

        self.shutdown.cancel();
        let task = self.watch_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        for gateway in &self.gateways {
            if let Err(e) = gateway.destroy().await {
                error!(
                    protocol = %gateway.protocol(),
                    error = %e,
                    "Failed to destroy protocol gateway"
                );
            }
        }

        info!(path = %self.path, "Gateway listener stopped");
    }

    /// Apply one membership-change event to the service map
    fn apply_event(&self, event: ChildEvent) {
        counter!("discovery_events_applied").increment(1);
        match event.kind {
            ChildEventKind::Added | ChildEventKind::Updated => {
                self.apply_announcement(&event.child_id, &event.payload, event.version);
            }
            ChildEventKind::Removed => {
                debug!(child_id = %event.child_id, "Backend removed from discovery");
                self.service_map.remove_everywhere(&event.child_id);
            }
        }
    }

    /// Upsert a backend announcement under every protocol key it advertises
    ///
    /// Malformed payloads or transport URLs are skipped and logged, never
    /// fatal to the watch. Protocol keys the child announced previously but
    /// no longer does are evicted for that child.
    fn apply_announcement(&self, child_id: &str, payload: &[u8], version: u64) {
        let announcement = match BackendAnnouncement::from_json(payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                counter!("discovery_payloads_skipped").increment(1);
                warn!(child_id = %child_id, error = %e, "Skipping malformed backend payload");
                return;
            }
        };

        let mut announced_keys: HashSet<String> = HashSet::new();
        for raw in &announcement.services {
            let endpoint = match parse_transport_url(raw) {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    counter!("discovery_payloads_skipped").increment(1);
                    warn!(child_id = %child_id, error = %e, "Skipping malformed transport url");
                    continue;
                }
            };
            announced_keys.insert(endpoint.protocol.clone());
            self.service_map.put(
                &endpoint.protocol,
                ServiceEntry {
                    id: child_id.to_string(),
                    address: endpoint.address,
                    protocol_hint: endpoint.protocol.clone(),
                    last_seen_version: version,
                },
            );
        }

        for key in self.service_map.protocol_keys() {
            if !announced_keys.contains(&key) {
                self.service_map.remove(&key, child_id);
            }
        }
    }

    /// Rebuild map contents from a fresh read after the event stream lagged
    fn reconcile(&self, children: &[ChildNode]) {
        let live: HashSet<&str> = children.iter().map(|c| c.id.as_str()).collect();

        for key in self.service_map.protocol_keys() {
            for entry in self.service_map.snapshot(&key) {
                if !live.contains(entry.id.as_str()) {
                    self.service_map.remove(&key, &entry.id);
                }
            }
        }

        for child in children {
            self.apply_announcement(&child.id, &child.payload, child.version);
        }
    }
}
