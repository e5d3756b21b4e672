//! # Service Map Module
//!
//! Concurrency-safe registry mapping a protocol key to the ordered set of
//! live backend addresses terminating that protocol. Pure data structure:
//! mutated only by the `GatewayListener`, read by many concurrent connection
//! handlers at connect time.
//!
//! ## Rust Concepts Used
//!
//! - `DashMap` shards its entries, so locking is per-key: readers of key A
//!   never block writers of key B, and no transaction spans multiple keys
//! - `snapshot` clones the partition under the shard lock, so a reader sees
//!   either the pre- or post-mutation state, never a partially applied update

use dashmap::DashMap;
use tracing::debug;

use crate::core::types::ServiceEntry;

/// Registry of discovered backends, partitioned by protocol key
#[derive(Debug, Default)]
pub struct ServiceMap {
    services: DashMap<String, Vec<ServiceEntry>>,
}

impl ServiceMap {
    /// Create an empty service map
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Add or replace an entry under a protocol key
    ///
    /// Replacement matches on entry id, so an UPDATED event for a known child
    /// swaps its entry in place of the old one. New entries append, keeping
    /// insertion order for round-robin tie-breaking.
    pub fn put(&self, key: &str, entry: ServiceEntry) {
        let mut entries = self.services.entry(key.to_string()).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            debug!(protocol = %key, backend = %entry, "Registered backend");
            entries.push(entry);
        }
    }

    /// Remove the entry with the given id from one protocol key
    pub fn remove(&self, key: &str, entry_id: &str) {
        if let Some(mut entries) = self.services.get_mut(key) {
            let before = entries.len();
            entries.retain(|e| e.id != entry_id);
            if entries.len() != before {
                debug!(protocol = %key, backend_id = %entry_id, "Evicted backend");
            }
            if entries.is_empty() {
                drop(entries);
                self.services.remove_if(key, |_, v| v.is_empty());
            }
        }
    }

    /// Remove the entry with the given id from every protocol key
    ///
    /// Used when a discovery child disappears: one child can announce
    /// endpoints for several protocols.
    pub fn remove_everywhere(&self, entry_id: &str) {
        let keys: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.remove(&key, entry_id);
        }
    }

    /// Consistent point-in-time copy of one partition
    ///
    /// An absent key yields an empty vec, never an error: "no backends" is a
    /// normal, retryable condition.
    pub fn snapshot(&self, key: &str) -> Vec<ServiceEntry> {
        self.services
            .get(key)
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Protocol keys with at least one live backend
    pub fn protocol_keys(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    /// Total number of entries across all partitions
    pub fn len(&self) -> usize {
        self.services.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
