//! Metrics instrumentation for skydns-sync.
//!
//! All metrics are prefixed with `skydns_sync.`

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::docker::EventType;

/// Record a consumed container event.
pub fn record_container_event(event_type: EventType) {
    let type_str = match event_type {
        EventType::InitialDetection => "initial_detection",
        EventType::Start => "start",
        EventType::Stop => "stop",
        EventType::Die => "die",
    };
    counter!("skydns_sync.event.count", "type" => type_str).increment(1);
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy)]
pub enum SyncOutcome {
    /// The pass ran to completion.
    Success,
    /// The pass was skipped because the global lock was not acquired.
    LockTimeout,
    /// Listing or the lock machinery failed.
    RegistryError,
    /// Shutdown arrived mid-pass.
    Cancelled,
}

/// Record one reconciliation pass and its duration.
pub fn record_sync_pass(outcome: SyncOutcome, duration: Duration) {
    let outcome_str = match outcome {
        SyncOutcome::Success => "success",
        SyncOutcome::LockTimeout => "lock_timeout",
        SyncOutcome::RegistryError => "registry_error",
        SyncOutcome::Cancelled => "cancelled",
    };
    counter!("skydns_sync.sync.count", "outcome" => outcome_str).increment(1);
    histogram!("skydns_sync.sync.duration.seconds").record(duration.as_secs_f64());
}

/// Record records applied by one pass.
pub fn record_records_applied(added: usize, removed: usize) {
    counter!("skydns_sync.records.added.count").increment(added as u64);
    counter!("skydns_sync.records.removed.count").increment(removed as u64);
}

/// Record a failed apply of one record during a pass.
pub fn record_registry_op_error(op: &'static str) {
    counter!("skydns_sync.registry.error.count", "op" => op).increment(1);
}

/// Record a successful registry write.
pub fn record_registry_write(op: &'static str) {
    counter!("skydns_sync.registry.write.count", "op" => op).increment(1);
}

/// Record a lock acquisition timeout.
pub fn record_lock_timeout(key: &str) {
    counter!("skydns_sync.lock.timeout.count", "key" => key.to_string()).increment(1);
}

/// Record a record rejected by validation during reconciliation.
pub fn record_validation_rejected() {
    counter!("skydns_sync.validation.rejected.count").increment(1);
}

/// Record local state counts (call periodically or on change).
pub fn record_state_counts(containers: usize, running: usize, desired_records: usize) {
    gauge!("skydns_sync.state.containers.count").set(containers as f64);
    gauge!("skydns_sync.state.containers.running").set(running as f64);
    gauge!("skydns_sync.state.desired_records.count").set(desired_records as f64);
}

/// Record the registry size observed by the last list.
pub fn record_actual_records(count: usize) {
    gauge!("skydns_sync.registry.records.count").set(count as f64);
}
