//! etcd-backed record registry.
//!
//! Stores record intents in the SkyDNS key layout (see [`crate::wire`]) and
//! provides the distributed lock that serializes reconciliation across the
//! fleet. Every RPC honors the caller's cancellation token; calls without a
//! caller deadline run under a local 5 second timeout.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, LeaseClient, PutOptions, Txn, TxnOp,
};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EtcdConfig;
use crate::error::SyncError;
use crate::intent::RecordIntent;
use crate::metrics;
use crate::wire::{self, WireRecord};

/// Lock key serializing reconciliation passes fleet-wide.
pub const GLOBAL_LOCK_KEY: &str = "__global__";

/// Local deadline for RPCs whose caller attached none.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Deletions per transactional commit in [`Registry::remove`].
const DELETE_BATCH_SIZE: usize = 64;

/// Floor for the lease keepalive cadence.
const MIN_KEEPALIVE_PERIOD: Duration = Duration::from_millis(250);

/// Record registry operations needed by the sync engine.
#[async_trait]
pub trait Registry: Send + Sync {
    /// All record intents currently stored, across all hosts.
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<RecordIntent>, SyncError>;

    /// Store one record intent under the next free indexed key.
    async fn register(
        &self,
        intent: &RecordIntent,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError>;

    /// Delete every stored record written for `intent`.
    async fn remove(
        &self,
        intent: &RecordIntent,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError>;

    /// Acquire distributed locks on `keys` (deduplicated and sorted to
    /// avoid deadlock). On failure nothing stays held.
    async fn acquire_locks(
        &self,
        keys: &[&str],
        cancel: &CancellationToken,
    ) -> Result<HeldLocks, SyncError>;

    /// Release locks in reverse acquisition order. Release errors are
    /// logged, never returned.
    async fn release_locks(&self, locks: HeldLocks);
}

/// Run `body` with distributed locks held on `keys`; the body's result is
/// the transaction's result.
pub async fn lock_transaction<R, F, Fut, T>(
    registry: &R,
    keys: &[&str],
    cancel: &CancellationToken,
    body: F,
) -> Result<T, SyncError>
where
    R: Registry + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let locks = registry.acquire_locks(keys, cancel).await?;
    let result = body().await;
    registry.release_locks(locks).await;
    result
}

/// One acquired lock: the etcd lock path, its lease, and the keepalive
/// task draining lease responses until release.
#[derive(Debug)]
struct HeldLock {
    lock_path: String,
    lease_id: i64,
    keepalive_cancel: CancellationToken,
    keepalive_task: tokio::task::JoinHandle<()>,
}

/// Locks held by [`Registry::acquire_locks`], released as a unit.
#[derive(Debug, Default)]
pub struct HeldLocks(Vec<HeldLock>);

impl HeldLocks {
    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no locks are held.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// etcd-backed implementation of [`Registry`].
pub struct EtcdRegistry {
    client: Client,
    cfg: EtcdConfig,
    hostname: String,
}

impl EtcdRegistry {
    /// Connect to the configured endpoints. Fails fast: a refused initial
    /// connection is a startup error.
    pub async fn connect(cfg: &EtcdConfig, hostname: String) -> Result<Self, SyncError> {
        let options = ConnectOptions::new().with_connect_timeout(RPC_TIMEOUT);
        let client = Client::connect(&cfg.endpoints, Some(options)).await?;
        info!(endpoints = ?cfg.endpoints, prefix = %cfg.path_prefix, "connected to etcd");
        Ok(Self {
            client,
            cfg: cfg.clone(),
            hostname,
        })
    }

    /// Next free indexed key under the FQDN base: `base/x<N>` with the
    /// smallest positive `N` not in use.
    async fn next_indexed_key(
        &self,
        fqdn: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SyncError> {
        let base = wire::key_base(&self.cfg.path_prefix, fqdn);
        let mut kv = self.client.kv_client();
        let options = GetOptions::new()
            .with_prefix()
            .with_keys_only()
            .with_serializable();
        let resp = guarded(cancel, kv.get(format!("{base}/"), Some(options))).await?;

        let mut used = BTreeSet::new();
        for entry in resp.kvs() {
            let Ok(key) = entry.key_str() else { continue };
            let Some(suffix) = key.strip_prefix(&base).and_then(|s| s.strip_prefix('/')) else {
                continue;
            };
            // Only immediate children that look like index segments count;
            // deeper paths belong to other FQDNs.
            if suffix.contains('/') {
                continue;
            }
            if let Some(index) = wire::index_of_segment(suffix) {
                used.insert(index);
            }
        }

        let mut index = 1;
        while used.contains(&index) {
            index += 1;
        }
        Ok(format!("{base}/x{index}"))
    }

    async fn acquire_one(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<HeldLock, SyncError> {
        let lock_path = format!("/locks/{key}");
        let mut lease = self.client.lease_client();

        let ttl_secs = self.cfg.lock_ttl.max(1.0).round() as i64;
        let grant = guarded(cancel, lease.grant(ttl_secs, None)).await?;
        let lease_id = grant.id();

        let deadline = Instant::now() + Duration::from_secs_f64(self.cfg.lock_timeout);
        loop {
            if Instant::now() >= deadline {
                debug!(key, "lock acquisition timed out, revoking unused lease");
                self.revoke_lease_best_effort(lease_id).await;
                metrics::record_lock_timeout(key);
                return Err(SyncError::LockTimeout {
                    key: key.to_string(),
                });
            }

            let txn = Txn::new()
                .when([Compare::create_revision(
                    lock_path.as_str(),
                    CompareOp::Equal,
                    0,
                )])
                .and_then([TxnOp::put(
                    lock_path.as_str(),
                    self.hostname.as_str(),
                    Some(PutOptions::new().with_lease(lease_id)),
                )]);
            let mut kv = self.client.kv_client();
            let resp = match guarded(cancel, kv.txn(txn)).await {
                Ok(resp) => resp,
                Err(err) => {
                    self.revoke_lease_best_effort(lease_id).await;
                    return Err(err);
                }
            };

            if resp.succeeded() {
                let keepalive_cancel = CancellationToken::new();
                let period = Duration::from_secs_f64(self.cfg.lock_ttl / 3.0)
                    .max(MIN_KEEPALIVE_PERIOD);
                let keepalive_task = tokio::spawn(keep_lease_alive(
                    self.client.lease_client(),
                    lease_id,
                    period,
                    keepalive_cancel.clone(),
                ));
                debug!(key, lease_id, "acquired lock");
                return Ok(HeldLock {
                    lock_path,
                    lease_id,
                    keepalive_cancel,
                    keepalive_task,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.revoke_lease_best_effort(lease_id).await;
                    return Err(SyncError::Cancelled);
                }
                _ = sleep(Duration::from_secs_f64(self.cfg.lock_retry_interval)) => {}
            }
        }
    }

    async fn revoke_lease_best_effort(&self, lease_id: i64) {
        let mut lease = self.client.lease_client();
        match timeout(RPC_TIMEOUT, lease.revoke(lease_id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(lease_id, error = %err, "failed to revoke unused lease"),
            Err(_) => warn!(lease_id, "timed out revoking unused lease"),
        }
    }
}

/// Keep one lease alive until its cancel token fires. The responses carry
/// nothing we use; draining them is what keeps the lease fresh.
async fn keep_lease_alive(
    mut lease: LeaseClient,
    lease_id: i64,
    period: Duration,
    cancel: CancellationToken,
) {
    let (mut keeper, mut stream) = match lease.keep_alive(lease_id).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(lease_id, error = %err, "failed to start lease keepalive");
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = sleep(period) => {
                if let Err(err) = keeper.keep_alive().await {
                    warn!(lease_id, error = %err, "lease keepalive send failed");
                    return;
                }
                match stream.message().await {
                    Ok(_) => {}
                    Err(err) => {
                        warn!(lease_id, error = %err, "lease keepalive stream failed");
                        return;
                    }
                }
            }
        }
    }
}

/// Run an RPC future under the caller's cancellation token and the local
/// deadline.
async fn guarded<T, F>(cancel: &CancellationToken, rpc: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, etcd_client::Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = timeout(RPC_TIMEOUT, rpc) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(SyncError::RpcTimeout),
        },
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<RecordIntent>, SyncError> {
        let prefix = self.cfg.path_prefix.clone();
        let mut kv = self.client.kv_client();
        let options = GetOptions::new().with_prefix().with_serializable();
        let resp = guarded(cancel, kv.get(prefix.as_str(), Some(options))).await?;

        let mut intents = Vec::with_capacity(resp.kvs().len());
        for entry in resp.kvs() {
            let key = match entry.key_str() {
                Ok(key) => key,
                Err(err) => {
                    warn!(error = %err, "skipping registry key with non-utf8 bytes");
                    continue;
                }
            };
            let value = match entry.value_str() {
                Ok(value) => value,
                Err(err) => {
                    warn!(key, error = %err, "skipping registry value with non-utf8 bytes");
                    continue;
                }
            };
            let wire: WireRecord = match serde_json::from_str(value) {
                Ok(wire) => wire,
                Err(err) => {
                    warn!(key, error = %err, "skipping undecodable registry value");
                    continue;
                }
            };
            let fqdn = wire::fqdn_from_key(&prefix, key);
            match wire.into_intent(&fqdn) {
                Ok(intent) => intents.push(intent),
                Err(err) => {
                    warn!(key, error = %err, "skipping registry value with invalid record");
                }
            }
        }
        metrics::record_actual_records(intents.len());
        Ok(intents)
    }

    async fn register(
        &self,
        intent: &RecordIntent,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let key = self.next_indexed_key(intent.record.name(), cancel).await?;
        let value = serde_json::to_string(&WireRecord::from_intent(intent))
            .expect("wire record serialization is infallible");

        let mut kv = self.client.kv_client();
        guarded(cancel, kv.put(key.as_str(), value, None)).await?;
        info!(
            key = %key,
            fqdn = intent.record.name(),
            kind = %intent.record.kind(),
            value = %intent.record.value(),
            owner_hostname = %intent.hostname,
            owner_container_id = %intent.container_id,
            "registered record"
        );
        metrics::record_registry_write("register");
        Ok(())
    }

    async fn remove(
        &self,
        intent: &RecordIntent,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let base = wire::key_base(&self.cfg.path_prefix, intent.record.name());
        let mut kv = self.client.kv_client();
        let options = GetOptions::new().with_prefix();
        let resp = guarded(cancel, kv.get(format!("{base}/"), Some(options))).await?;

        let mut to_delete = Vec::new();
        for entry in resp.kvs() {
            let (Ok(key), Ok(value)) = (entry.key_str(), entry.value_str()) else {
                continue;
            };
            let wire: WireRecord = match serde_json::from_str(value) {
                Ok(wire) => wire,
                Err(err) => {
                    warn!(key, error = %err, "skipping undecodable registry value during remove");
                    continue;
                }
            };
            if wire.matches(intent) {
                to_delete.push(key.to_string());
            }
        }

        if to_delete.is_empty() {
            debug!(
                fqdn = intent.record.name(),
                kind = %intent.record.kind(),
                owner_hostname = %intent.hostname,
                "remove found no matching keys"
            );
            return Ok(());
        }

        // One transaction per batch: a single huge transaction can exceed
        // etcd's max-ops limit, individual deletes lose per-batch atomicity.
        let mut first_err = None;
        for batch in to_delete.chunks(DELETE_BATCH_SIZE) {
            let ops: Vec<TxnOp> = batch
                .iter()
                .map(|key| TxnOp::delete(key.as_str(), None))
                .collect();
            match guarded(cancel, kv.txn(Txn::new().and_then(ops))).await {
                Ok(_) => {
                    for key in batch {
                        info!(key = %key, fqdn = intent.record.name(), "removed record");
                    }
                    metrics::record_registry_write("remove");
                }
                Err(err) => {
                    warn!(batch = batch.len(), error = %err, "batch delete failed");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    async fn acquire_locks(
        &self,
        keys: &[&str],
        cancel: &CancellationToken,
    ) -> Result<HeldLocks, SyncError> {
        // Dedup and sort so concurrent callers acquire in the same order.
        let unique: BTreeSet<&str> = keys.iter().copied().collect();

        let mut held = Vec::with_capacity(unique.len());
        for key in unique {
            match self.acquire_one(key, cancel).await {
                Ok(lock) => held.push(lock),
                Err(err) => {
                    self.release_locks(HeldLocks(held)).await;
                    return Err(err);
                }
            }
        }
        Ok(HeldLocks(held))
    }

    async fn release_locks(&self, locks: HeldLocks) {
        for lock in locks.0.into_iter().rev() {
            lock.keepalive_cancel.cancel();
            if let Err(err) = lock.keepalive_task.await {
                warn!(lock_path = %lock.lock_path, error = %err, "lease keepalive task failed");
            }

            let mut kv = self.client.kv_client();
            match timeout(RPC_TIMEOUT, kv.delete(lock.lock_path.as_str(), None)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(lock_path = %lock.lock_path, error = %err, "failed to delete lock key")
                }
                Err(_) => {
                    warn!(lock_path = %lock.lock_path, "timed out deleting lock key")
                }
            }

            let mut lease = self.client.lease_client();
            match timeout(RPC_TIMEOUT, lease.revoke(lock.lease_id)).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(lock_path = %lock.lock_path, error = %err, "failed to revoke lease")
                }
                Err(_) => {
                    warn!(lock_path = %lock.lock_path, "timed out revoking lease")
                }
            }
            debug!(lock_path = %lock.lock_path, "released lock");
        }
    }
}

impl std::fmt::Debug for EtcdRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdRegistry")
            .field("endpoints", &self.cfg.endpoints)
            .field("path_prefix", &self.cfg.path_prefix)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}
