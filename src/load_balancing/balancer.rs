//! # Load Balancer Module
//!
//! Round-robin backend selection over a service-map snapshot. The rotation
//! counter is shared per protocol key across all connections, so repeated
//! selections fan out evenly even when every connection takes its own
//! snapshot. Ties break by snapshot (insertion) order.
//!
//! ## Rust Concepts Used
//!
//! - `AtomicUsize` with `fetch_add` gives a lock-free, thread-safe rotation
//!   counter; the counter wraps on overflow which the modulo absorbs
//! - `DashMap` holds one counter per protocol key without a global lock

use dashmap::DashMap;
use metrics::counter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Round-robin balancer with one shared rotation counter per protocol key
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counters: DashMap<String, AtomicUsize>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Pick the starting index for a routing attempt over a snapshot
    ///
    /// Returns `None` for an empty snapshot. For N consecutive selections
    /// against a stable snapshot of size K, each index is returned ⌊N/K⌋ or
    /// ⌈N/K⌉ times.
    pub fn next_index(&self, protocol: &str, pool_size: usize) -> Option<usize> {
        if pool_size == 0 {
            counter!("gateway_backend_selections_failed").increment(1);
            return None;
        }

        let counter = self
            .counters
            .entry(protocol.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let index = counter.fetch_add(1, Ordering::Relaxed) % pool_size;

        counter!("gateway_backend_selections").increment(1);
        debug!(
            protocol = %protocol,
            index = index,
            pool_size = pool_size,
            algorithm = "round_robin",
            "Selected backend slot"
        );

        Some(index)
    }

    /// Current counter values per protocol key, for diagnostics
    pub fn selection_counts(&self) -> HashMap<String, usize> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}
