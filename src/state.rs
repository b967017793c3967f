//! In-memory tracking of containers seen on this host.
//!
//! The event consumer writes; the reconciliation ticker reads. Readers get
//! point-in-time copies of the intent slices, never references into the map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::intent::RecordIntent;
use crate::metrics;

/// Whether a tracked container still contributes to the desired set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Contributes its intents to the desired set.
    Running,
    /// Seen stopping or dying; intents retained but excluded.
    Removed,
}

#[derive(Debug, Clone)]
struct ContainerState {
    container_name: String,
    created: DateTime<Utc>,
    intents: Vec<RecordIntent>,
    status: ContainerStatus,
    last_updated: Instant,
}

/// Thread-safe store of per-container record intents, keyed by container id.
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    inner: Arc<RwLock<HashMap<String, ContainerState>>>,
}

impl StateTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for a container.
    pub fn upsert(
        &self,
        container_id: &str,
        container_name: &str,
        created: DateTime<Utc>,
        intents: Vec<RecordIntent>,
        status: ContainerStatus,
    ) {
        let mut inner = self.inner.write();
        debug!(
            container_id,
            container_name,
            intents = intents.len(),
            ?status,
            "upserting container state"
        );
        inner.insert(
            container_id.to_string(),
            ContainerState {
                container_name: container_name.to_string(),
                created,
                intents,
                status,
                last_updated: Instant::now(),
            },
        );
    }

    /// Flip a container to `Removed`. Returns whether an entry existed.
    pub fn mark_removed(&self, container_id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(container_id) {
            Some(state) => {
                state.status = ContainerStatus::Removed;
                state.last_updated = Instant::now();
                debug!(
                    container_id,
                    container_name = %state.container_name,
                    created = %state.created,
                    "marked container removed"
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of all intents declared by running containers.
    pub fn desired_intents(&self) -> Vec<RecordIntent> {
        let inner = self.inner.read();
        inner
            .values()
            .filter(|state| state.status == ContainerStatus::Running)
            .flat_map(|state| state.intents.iter().cloned())
            .collect()
    }

    /// Drop `Removed` entries that have been idle longer than `ttl`.
    /// Returns the number of entries purged.
    pub fn purge_removed(&self, ttl: Duration) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, state| {
            state.status == ContainerStatus::Running || state.last_updated.elapsed() <= ttl
        });
        let purged = before - inner.len();
        if purged > 0 {
            debug!(purged, "purged removed container entries");
        }
        purged
    }

    /// Number of tracked containers (any status).
    pub fn container_count(&self) -> usize {
        self.inner.read().len()
    }

    /// Number of tracked containers currently running.
    pub fn running_count(&self) -> usize {
        self.inner
            .read()
            .values()
            .filter(|state| state.status == ContainerStatus::Running)
            .count()
    }

    /// Emit current state gauges.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        let running = inner
            .values()
            .filter(|state| state.status == ContainerStatus::Running)
            .count();
        let desired = inner
            .values()
            .filter(|state| state.status == ContainerStatus::Running)
            .map(|state| state.intents.len())
            .sum();
        metrics::record_state_counts(inner.len(), running, desired);
    }
}
