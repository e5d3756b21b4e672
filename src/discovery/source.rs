//! # Discovery Source Module
//!
//! External boundary over the coordination service. The gateway never talks
//! to the coordination backend directly: it reads the current children of a
//! watched path once at startup and then consumes a lazy, restartable stream
//! of child add/remove/update events. Reconnection is the source's own
//! responsibility; after a reconnect a source may replay a full resync burst
//! (all children REMOVED then re-ADDED) and consumers must absorb it.
//!
//! An in-memory implementation is provided for tests and standalone
//! deployments; production deployments plug a coordination-service client in
//! behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::warn;

use crate::core::error::GatewayResult;

/// Kind of membership change observed under a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildEventKind {
    Added,
    Removed,
    Updated,
}

/// One membership-change event for one child of a watched path
#[derive(Debug, Clone)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    pub child_id: String,
    /// Raw payload; empty for REMOVED events
    pub payload: Vec<u8>,
    /// Monotonically increasing per-source version
    pub version: u64,
}

/// A child node as seen by a one-shot read of the watched path
#[derive(Debug, Clone)]
pub struct ChildNode {
    pub id: String,
    pub payload: Vec<u8>,
    pub version: u64,
}

/// Type alias for the event stream handed to watchers
pub type ChildEventReceiver = broadcast::Receiver<ChildEvent>;

/// Watch/read primitive over a coordination-service subtree
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Read the currently known children of a path
    ///
    /// Used to prime the service map synchronously before the first
    /// connection is accepted.
    async fn read_children(&self, path: &str) -> GatewayResult<Vec<ChildNode>>;

    /// Subscribe to membership changes under a path
    ///
    /// Events for the same child arrive in order; events for different
    /// children may interleave arbitrarily.
    async fn watch(&self, path: &str) -> GatewayResult<ChildEventReceiver>;
}

/// In-memory discovery source for tests and standalone deployments
///
/// Mirrors the observable contract of a real coordination-service watch,
/// including the ability to replay a full resync burst.
pub struct InMemoryDiscovery {
    children: DashMap<String, Vec<ChildNode>>,
    senders: DashMap<String, broadcast::Sender<ChildEvent>>,
    version: AtomicU64,
}

impl InMemoryDiscovery {
    pub fn new() -> Self {
        Self {
            children: DashMap::new(),
            senders: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    fn sender(&self, path: &str) -> broadcast::Sender<ChildEvent> {
        self.senders
            .entry(path.to_string())
            .or_insert_with(|| broadcast::channel(1000).0)
            .clone()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, path: &str, event: ChildEvent) {
        if let Some(sender) = self.senders.get(path) {
            // A send error means no subscribers yet; state stays readable
            // via read_children
            let _ = sender.send(event);
        }
    }

    /// Register or replace a child under a path, emitting ADDED or UPDATED
    pub fn announce(&self, path: &str, child_id: &str, payload: Vec<u8>) {
        let version = self.next_version();
        let mut children = self.children.entry(path.to_string()).or_default();

        let kind = if let Some(existing) = children.iter_mut().find(|c| c.id == child_id) {
            existing.payload = payload.clone();
            existing.version = version;
            ChildEventKind::Updated
        } else {
            children.push(ChildNode {
                id: child_id.to_string(),
                payload: payload.clone(),
                version,
            });
            ChildEventKind::Added
        };
        drop(children);

        self.emit(
            path,
            ChildEvent {
                kind,
                child_id: child_id.to_string(),
                payload,
                version,
            },
        );
    }

    /// Remove a child from a path, emitting REMOVED
    pub fn retire(&self, path: &str, child_id: &str) {
        let mut removed = false;
        if let Some(mut children) = self.children.get_mut(path) {
            let before = children.len();
            children.retain(|c| c.id != child_id);
            removed = children.len() != before;
        }

        if removed {
            let version = self.next_version();
            self.emit(
                path,
                ChildEvent {
                    kind: ChildEventKind::Removed,
                    child_id: child_id.to_string(),
                    payload: Vec::new(),
                    version,
                },
            );
        } else {
            warn!(path = %path, child_id = %child_id, "Retire for unknown child ignored");
        }
    }

    /// Replay a full reconnect burst: every child REMOVED, then re-ADDED
    ///
    /// Exercises the worst-case resync window a real coordination client can
    /// produce after a session re-establishment.
    pub fn resync(&self, path: &str) {
        let current: Vec<ChildNode> = self
            .children
            .get(path)
            .map(|c| c.clone())
            .unwrap_or_default();

        for child in &current {
            let version = self.next_version();
            self.emit(
                path,
                ChildEvent {
                    kind: ChildEventKind::Removed,
                    child_id: child.id.clone(),
                    payload: Vec::new(),
                    version,
                },
            );
        }

        for child in &current {
            let version = self.next_version();
            self.emit(
                path,
                ChildEvent {
                    kind: ChildEventKind::Added,
                    child_id: child.id.clone(),
                    payload: child.payload.clone(),
                    version,
                },
            );
        }
    }
}

impl Default for InMemoryDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for InMemoryDiscovery {
    async fn read_children(&self, path: &str) -> GatewayResult<Vec<ChildNode>> {
        Ok(self
            .children
            .get(path)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn watch(&self, path: &str) -> GatewayResult<ChildEventReceiver> {
        Ok(self.sender(path).subscribe())
    }
}
