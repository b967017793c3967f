//! The sync engine: consumes container events into local state and
//! periodically reconciles the desired set against the registry under the
//! fleet-wide lock.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::docker::{ContainerEvent, EventSource};
use crate::error::SyncError;
use crate::filter::filter_record_intents;
use crate::labels::build_record_intents;
use crate::metrics::{self, SyncOutcome};
use crate::reconciler::reconcile_and_validate;
use crate::registry::{lock_transaction, Registry, GLOBAL_LOCK_KEY};
use crate::state::{ContainerStatus, StateTracker};

/// How long a removed container entry lingers in memory before purge.
const STATE_PURGE_TTL: Duration = Duration::from_secs(60);

/// Orchestrates event consumption and periodic reconciliation.
pub struct SyncEngine<R, S> {
    cfg: AppConfig,
    registry: R,
    source: S,
    state: StateTracker,
}

impl<R, S> SyncEngine<R, S>
where
    R: Registry,
    S: EventSource,
{
    /// Wire up an engine over a registry and an event source.
    pub fn new(cfg: AppConfig, registry: R, source: S) -> Self {
        Self {
            cfg,
            registry,
            source,
            state: StateTracker::new(),
        }
    }

    /// The local container state store.
    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    /// Run until `cancel` fires. Returns `Ok(())` on orderly shutdown; an
    /// error only if the event subscription cannot be established.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SyncError> {
        info!(
            hostname = %self.cfg.hostname,
            poll_interval = self.cfg.poll_interval,
            "sync engine starting"
        );

        let events = self.source.subscribe(cancel.child_token()).await?;
        let consumer = tokio::spawn(consume_events(
            events,
            self.state.clone(),
            self.cfg.clone(),
            cancel.clone(),
        ));

        let period = Duration::from_secs(self.cfg.poll_interval);
        let mut ticker = interval_at(Instant::now() + period, period);
        // A tick whose work overruns the period delays the next tick
        // rather than firing a burst to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("sync engine shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    debug!("reconciliation tick");
                    self.run_reconciliation(&cancel).await;
                    self.state.purge_removed(STATE_PURGE_TTL);
                    self.state.emit_metrics();
                }
            }
        }

        if let Err(err) = consumer.await {
            error!(error = %err, "event consumer task failed");
        }
        Ok(())
    }

    /// One reconciliation pass under the global lock. Individual apply
    /// errors are logged and do not abort the pass; a lock timeout skips
    /// the pass entirely.
    pub(crate) async fn run_reconciliation(&self, cancel: &CancellationToken) {
        let started = std::time::Instant::now();
        let result = lock_transaction(&self.registry, &[GLOBAL_LOCK_KEY], cancel, || async move {
            let actual = self.registry.list(cancel).await?;
            let desired = filter_record_intents(self.state.desired_intents());
            let (to_add, to_remove) =
                reconcile_and_validate(&desired, &actual, &self.cfg.hostname);

            if !to_add.is_empty() || !to_remove.is_empty() {
                info!(
                    add = to_add.len(),
                    remove = to_remove.len(),
                    "applying reconciliation result"
                );
            }

            let mut removed = 0usize;
            for intent in &to_remove {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                match self.registry.remove(intent, cancel).await {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        error!(record = %intent.record, error = %err, "failed to remove record");
                        metrics::record_registry_op_error("remove");
                    }
                }
            }

            let mut added = 0usize;
            for intent in &to_add {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                match self.registry.register(intent, cancel).await {
                    Ok(()) => added += 1,
                    Err(err) => {
                        error!(record = %intent.record, error = %err, "failed to register record");
                        metrics::record_registry_op_error("register");
                    }
                }
            }

            metrics::record_records_applied(added, removed);
            Ok(())
        })
        .await;

        let outcome = match result {
            Ok(()) => SyncOutcome::Success,
            Err(SyncError::LockTimeout { ref key }) => {
                warn!(key = %key, "lock not acquired, skipping reconciliation pass");
                SyncOutcome::LockTimeout
            }
            Err(SyncError::Cancelled) => SyncOutcome::Cancelled,
            Err(err) => {
                error!(error = %err, "reconciliation pass failed");
                SyncOutcome::RegistryError
            }
        };
        metrics::record_sync_pass(outcome, started.elapsed());
    }
}

/// Read the event channel until it closes or shutdown is requested.
async fn consume_events(
    mut events: mpsc::Receiver<ContainerEvent>,
    state: StateTracker,
    cfg: AppConfig,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("event consumer shutting down");
                return;
            }
            event = events.recv() => match event {
                Some(event) => handle_event(&state, &cfg, event),
                None => {
                    info!("event channel closed");
                    return;
                }
            },
        }
    }
}

fn handle_event(state: &StateTracker, cfg: &AppConfig, event: ContainerEvent) {
    if event.id.is_empty() {
        warn!(?event.event_type, "dropping container event without id");
        return;
    }
    metrics::record_container_event(event.event_type);

    if event.event_type.is_up() {
        let intents = build_record_intents(&event, cfg);
        if intents.is_empty() {
            debug!(
                container_id = %event.id,
                container_name = %event.name,
                "container declares no records"
            );
            return;
        }
        state.upsert(
            &event.id,
            &event.name,
            event.created,
            intents,
            ContainerStatus::Running,
        );
    } else if state.mark_removed(&event.id) {
        debug!(container_id = %event.id, "container left the desired set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RecordTypeToggle, RecordTypesConfig};
    use crate::docker::EventType;
    use crate::intent::RecordIntent;
    use crate::record::Record;
    use crate::registry::HeldLocks;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    /// In-memory registry capturing applied operations.
    #[derive(Default)]
    struct FakeRegistry {
        records: Mutex<Vec<RecordIntent>>,
        fail_register: bool,
    }

    impl FakeRegistry {
        fn with_records(records: Vec<RecordIntent>) -> Self {
            Self {
                records: Mutex::new(records),
                fail_register: false,
            }
        }

        fn snapshot(&self) -> Vec<RecordIntent> {
            self.records.lock().clone()
        }
    }

    #[async_trait]
    impl Registry for FakeRegistry {
        async fn list(
            &self,
            _cancel: &CancellationToken,
        ) -> Result<Vec<RecordIntent>, SyncError> {
            Ok(self.records.lock().clone())
        }

        async fn register(
            &self,
            intent: &RecordIntent,
            _cancel: &CancellationToken,
        ) -> Result<(), SyncError> {
            if self.fail_register {
                return Err(SyncError::RpcTimeout);
            }
            self.records.lock().push(intent.clone());
            Ok(())
        }

        async fn remove(
            &self,
            intent: &RecordIntent,
            _cancel: &CancellationToken,
        ) -> Result<(), SyncError> {
            self.records.lock().retain(|r| !r.same_identity(intent));
            Ok(())
        }

        async fn acquire_locks(
            &self,
            _keys: &[&str],
            _cancel: &CancellationToken,
        ) -> Result<HeldLocks, SyncError> {
            Ok(HeldLocks::default())
        }

        async fn release_locks(&self, _locks: HeldLocks) {}
    }

    /// Event source backed by a prepared event list.
    struct FakeSource {
        events: Mutex<Vec<ContainerEvent>>,
    }

    #[async_trait]
    impl EventSource for FakeSource {
        async fn subscribe(
            &self,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<ContainerEvent>, SyncError> {
            let (tx, rx) = mpsc::channel(16);
            for event in self.events.lock().drain(..) {
                tx.try_send(event).unwrap();
            }
            Ok(rx)
        }
    }

    fn test_cfg() -> AppConfig {
        AppConfig {
            record_types: RecordTypesConfig {
                a: RecordTypeToggle { enabled: true },
                aaaa: RecordTypeToggle { enabled: false },
                cname: RecordTypeToggle { enabled: true },
            },
            docker_label_prefix: "coredns".to_string(),
            host_ipv4: None,
            host_ipv6: None,
            hostname: "h1".to_string(),
            poll_interval: 5,
        }
    }

    fn container_event(id: &str, event_type: EventType, labels: &[(&str, &str)]) -> ContainerEvent {
        ContainerEvent {
            id: id.to_string(),
            name: format!("ctr-{id}"),
            created: Utc.timestamp_opt(100, 0).unwrap(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            event_type,
        }
    }

    fn engine_with(
        registry: FakeRegistry,
    ) -> SyncEngine<FakeRegistry, FakeSource> {
        SyncEngine::new(
            test_cfg(),
            registry,
            FakeSource {
                events: Mutex::new(Vec::new()),
            },
        )
    }

    const WEB_LABELS: &[(&str, &str)] = &[
        ("coredns.enabled", "true"),
        ("coredns.A.name", "web.example"),
        ("coredns.A.value", "10.0.0.1"),
    ];

    #[test]
    fn test_handle_event_upserts_running_container() {
        let state = StateTracker::new();
        handle_event(
            &state,
            &test_cfg(),
            container_event("c1", EventType::Start, WEB_LABELS),
        );
        assert_eq!(state.desired_intents().len(), 1);
    }

    #[test]
    fn test_handle_event_initial_detection_upserts() {
        let state = StateTracker::new();
        handle_event(
            &state,
            &test_cfg(),
            container_event("c1", EventType::InitialDetection, WEB_LABELS),
        );
        assert_eq!(state.desired_intents().len(), 1);
    }

    #[test]
    fn test_handle_event_stop_removes() {
        let state = StateTracker::new();
        let cfg = test_cfg();
        handle_event(&state, &cfg, container_event("c1", EventType::Start, WEB_LABELS));
        handle_event(&state, &cfg, container_event("c1", EventType::Stop, &[]));
        assert!(state.desired_intents().is_empty());
    }

    #[test]
    fn test_handle_event_drops_missing_id() {
        let state = StateTracker::new();
        let mut event = container_event("", EventType::Start, WEB_LABELS);
        event.id = String::new();
        handle_event(&state, &test_cfg(), event);
        assert_eq!(state.container_count(), 0);
    }

    #[test]
    fn test_handle_event_without_intents_not_tracked() {
        let state = StateTracker::new();
        handle_event(
            &state,
            &test_cfg(),
            container_event("c1", EventType::Start, &[("coredns.enabled", "false")]),
        );
        assert_eq!(state.container_count(), 0);
    }

    #[tokio::test]
    async fn test_reconciliation_pass_registers_desired() {
        let engine = engine_with(FakeRegistry::default());
        handle_event(
            engine.state(),
            &test_cfg(),
            container_event("c1", EventType::Start, WEB_LABELS),
        );

        engine.run_reconciliation(&CancellationToken::new()).await;

        let records = engine.registry.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record.key(), "web.example|A|10.0.0.1");
    }

    #[tokio::test]
    async fn test_reconciliation_pass_removes_stale_own_records() {
        let stale = RecordIntent {
            container_id: "gone".to_string(),
            container_name: "old".to_string(),
            created: Utc.timestamp_opt(10, 0).unwrap(),
            hostname: "h1".to_string(),
            force: false,
            record: Record::a("old.example", "10.0.0.7").unwrap(),
        };
        let engine = engine_with(FakeRegistry::with_records(vec![stale]));

        engine.run_reconciliation(&CancellationToken::new()).await;

        assert!(engine.registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_pass_keeps_foreign_records() {
        let foreign = RecordIntent {
            container_id: "x".to_string(),
            container_name: "other".to_string(),
            created: Utc.timestamp_opt(10, 0).unwrap(),
            hostname: "h2".to_string(),
            force: false,
            record: Record::a("old.example", "10.0.0.7").unwrap(),
        };
        let engine = engine_with(FakeRegistry::with_records(vec![foreign]));

        engine.run_reconciliation(&CancellationToken::new()).await;

        assert_eq!(engine.registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_register_failure_does_not_abort_pass() {
        let mut registry = FakeRegistry::default();
        registry.fail_register = true;
        let engine = engine_with(registry);
        handle_event(
            engine.state(),
            &test_cfg(),
            container_event("c1", EventType::Start, WEB_LABELS),
        );

        // The pass completes despite every register failing.
        engine.run_reconciliation(&CancellationToken::new()).await;
        assert!(engine.registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_run_consumes_events_and_stops_on_cancel() {
        let source = FakeSource {
            events: Mutex::new(vec![
                container_event("c1", EventType::InitialDetection, WEB_LABELS),
                container_event("c2", EventType::Start, &[("coredns.enabled", "false")]),
            ]),
        };
        let engine = SyncEngine::new(test_cfg(), FakeRegistry::default(), source);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        engine.run(cancel).await.unwrap();
        assert_eq!(engine.state().desired_intents().len(), 1);
    }
}
