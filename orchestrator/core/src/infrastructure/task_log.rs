// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Dual-backend routing policy for the durable task log.
//!
//! Writes go to the primary ledger store until it fails; from then on this
//! and all subsequent calls are routed to the secondary fallback store
//! until [`TaskLogStore::reset_to_primary`] is called. If the secondary
//! also fails, the primary is attempted once more as a last resort before
//! the write is surfaced as [`StoreError::Exhausted`] - backend exhaustion
//! is the one fatal condition in this layer.
//!
//! The mode is explicit store state, toggled under a lock, never ambient
//! process state. While failed over, `search` is served by the secondary
//! backend and therefore returns an empty result set; this asymmetry is
//! accepted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::record::{
    keys, MetadataFilter, RecordMetadata, RecordStore, StorageRecord, StoreError,
};

/// Which backend is currently serving reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Primary,
    Fallback,
}

/// Periodic synchronization settings.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub interval: Duration,
    /// Upper bound on the serialized size of one batch.
    pub batch_budget_kb: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_budget_kb: 64,
        }
    }
}

pub struct TaskLogStore {
    primary: Arc<dyn RecordStore>,
    secondary: Arc<dyn RecordStore>,
    mode: Mutex<StoreMode>,
}

impl TaskLogStore {
    pub fn new(primary: Arc<dyn RecordStore>, secondary: Arc<dyn RecordStore>) -> Self {
        Self {
            primary,
            secondary,
            mode: Mutex::new(StoreMode::Primary),
        }
    }

    pub fn mode(&self) -> StoreMode {
        *self.mode.lock()
    }

    /// Return routing to the primary backend after an operator has
    /// confirmed it is healthy again.
    pub fn reset_to_primary(&self) {
        let mut mode = self.mode.lock();
        if *mode != StoreMode::Primary {
            info!("task log store reset to primary backend");
            *mode = StoreMode::Primary;
        }
    }

    fn enter_fallback(&self) {
        let mut mode = self.mode.lock();
        if *mode != StoreMode::Fallback {
            warn!("primary task log backend failed; routing to fallback store");
            *mode = StoreMode::Fallback;
        }
    }

    /// Persist `data` under `key`. With `overwrite` unset, an existing
    /// record of a different semantic type is never silently clobbered.
    pub async fn store(
        &self,
        key: impl Into<String>,
        data: serde_json::Value,
        metadata: RecordMetadata,
    ) -> Result<(), StoreError> {
        let record = StorageRecord::new(key, data, metadata);

        if !record.metadata.overwrite {
            match self.retrieve(&record.key).await {
                Ok(existing) => {
                    if existing.metadata.record_type != record.metadata.record_type {
                        return Err(StoreError::TypeConflict {
                            key: record.key,
                            stored: existing.metadata.record_type,
                            attempted: record.metadata.record_type,
                        });
                    }
                }
                Err(StoreError::NotFound(_)) => {}
                Err(err) => {
                    debug!(key = %record.key, error = %err, "pre-write lookup failed");
                }
            }
        }

        self.put_with_failover(&record).await
    }

    async fn put_with_failover(&self, record: &StorageRecord) -> Result<(), StoreError> {
        match self.mode() {
            StoreMode::Primary => match self.primary.put(record).await {
                Ok(()) => Ok(()),
                Err(primary_err) => {
                    warn!(key = %record.key, error = %primary_err, "primary store write failed");
                    self.enter_fallback();
                    match self.secondary.put(record).await {
                        Ok(()) => Ok(()),
                        Err(fallback_err) => self
                            .last_resort_put(record, primary_err, fallback_err)
                            .await,
                    }
                }
            },
            StoreMode::Fallback => match self.secondary.put(record).await {
                Ok(()) => Ok(()),
                Err(fallback_err) => {
                    warn!(key = %record.key, error = %fallback_err, "fallback store write failed");
                    match self.primary.put(record).await {
                        Ok(()) => Ok(()),
                        Err(primary_err) => Err(StoreError::Exhausted {
                            key: record.key.clone(),
                            primary: primary_err.to_string(),
                            fallback: fallback_err.to_string(),
                        }),
                    }
                }
            },
        }
    }

    async fn last_resort_put(
        &self,
        record: &StorageRecord,
        primary_err: StoreError,
        fallback_err: StoreError,
    ) -> Result<(), StoreError> {
        warn!(key = %record.key, "both backends failed; final primary attempt");
        match self.primary.put(record).await {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::Exhausted {
                key: record.key.clone(),
                primary: primary_err.to_string(),
                fallback: fallback_err.to_string(),
            }),
        }
    }

    /// Read a record, with the symmetric failover routing. A genuine
    /// absence (`NotFound`) on the active backend is checked against the
    /// other backend before being surfaced, since the record may have been
    /// written during a failover window; absence never flips the mode.
    pub async fn retrieve(&self, key: &str) -> Result<StorageRecord, StoreError> {
        let (active, other): (&Arc<dyn RecordStore>, &Arc<dyn RecordStore>) = match self.mode() {
            StoreMode::Primary => (&self.primary, &self.secondary),
            StoreMode::Fallback => (&self.secondary, &self.primary),
        };

        match active.get(key).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound(_)) => other.get(key).await,
            Err(active_err) => {
                if self.mode() == StoreMode::Primary {
                    warn!(key, error = %active_err, "primary store read failed");
                    self.enter_fallback();
                }
                match other.get(key).await {
                    Ok(record) => Ok(record),
                    Err(StoreError::NotFound(_)) => Err(StoreError::NotFound(key.to_string())),
                    Err(other_err) => Err(StoreError::Exhausted {
                        key: key.to_string(),
                        primary: active_err.to_string(),
                        fallback: other_err.to_string(),
                    }),
                }
            }
        }
    }

    /// Prefix search against the active backend. The fallback backend has
    /// no native search and yields an empty result set.
    pub async fn search(
        &self,
        prefix: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<StorageRecord>, StoreError> {
        match self.mode() {
            StoreMode::Primary => self.primary.search(prefix, filter).await,
            StoreMode::Fallback => self.secondary.search(prefix, filter).await,
        }
    }

    /// One synchronization pass: batch not-yet-synchronized `log:` records
    /// up to the size budget into a `batch:<millis>` record, then mark
    /// each constituent as synced in place so it is not re-sent. Returns
    /// the number of records batched.
    pub async fn sync_once(&self, batch_budget_bytes: usize) -> Result<usize, StoreError> {
        let records = self.search(keys::LOG_PREFIX, &MetadataFilter::default()).await?;
        let mut pending: Vec<StorageRecord> = records
            .into_iter()
            .filter(|record| !record.metadata.synced)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }
        pending.sort_by(|a, b| a.key.cmp(&b.key));

        let mut batch = Vec::new();
        let mut budget_used = 0usize;
        for record in pending {
            let size = record.approx_size();
            if !batch.is_empty() && budget_used + size > batch_budget_bytes {
                break;
            }
            budget_used += size;
            batch.push(record);
        }

        let batch_key = keys::batch(Utc::now().timestamp_millis());
        let payload = json!({
            "count": batch.len(),
            "records": batch,
        });
        self.store(batch_key.as_str(), payload, RecordMetadata::typed("batch"))
            .await?;

        for record in &batch {
            let mut metadata = record.metadata.clone();
            metadata.synced = true;
            metadata.overwrite = true;
            self.store(record.key.as_str(), record.data.clone(), metadata)
                .await?;
        }

        debug!(batch = %batch_key, records = batch.len(), "log batch synchronized");
        Ok(batch.len())
    }

    /// Run the synchronizer on a background task until aborted.
    pub fn spawn_sync(self: &Arc<Self>, config: SyncConfig) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.sync_once(config.batch_budget_kb * 1024).await {
                    Ok(0) => debug!("no log records awaiting synchronization"),
                    Ok(count) => info!(count, "synchronized log batch"),
                    Err(err) => warn!(error = %err, "log synchronization failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::MemoryRecordStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counting wrapper with failure injection.
    struct FlakyStore {
        inner: MemoryRecordStore,
        fail_puts: AtomicBool,
        fail_gets: AtomicBool,
        put_calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryRecordStore::new(),
                fail_puts: AtomicBool::new(false),
                fail_gets: AtomicBool::new(false),
                put_calls: AtomicUsize::new(0),
            }
        }

        fn fail_everything(&self) {
            self.fail_puts.store(true, Ordering::SeqCst);
            self.fail_gets.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn put(&self, record: &StorageRecord) -> Result<(), StoreError> {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected put failure".to_string()));
            }
            self.inner.put(record).await
        }

        async fn get(&self, key: &str) -> Result<StorageRecord, StoreError> {
            if self.fail_gets.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("injected get failure".to_string()));
            }
            self.inner.get(key).await
        }

        async fn search(
            &self,
            prefix: &str,
            filter: &MetadataFilter,
        ) -> Result<Vec<StorageRecord>, StoreError> {
            self.inner.search(prefix, filter).await
        }
    }

    fn dual(primary: Arc<FlakyStore>, secondary: Arc<FlakyStore>) -> TaskLogStore {
        TaskLogStore::new(primary, secondary)
    }

    #[tokio::test]
    async fn round_trip_through_primary() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        let mut metadata = RecordMetadata::typed("task").by_agent("observer");
        metadata.overwrite = true;
        store
            .store("task:t-1", json!({"status": "pending"}), metadata.clone())
            .await
            .unwrap();

        let back = store.retrieve("task:t-1").await.unwrap();
        assert_eq!(back.data, json!({"status": "pending"}));
        assert_eq!(back.metadata.agent.as_deref(), Some("observer"));
        assert_eq!(store.mode(), StoreMode::Primary);
        assert_eq!(secondary.put_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn primary_failure_activates_fallback_for_subsequent_calls() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        primary.fail_everything();

        store
            .store(
                "log:1",
                json!("first"),
                RecordMetadata::typed("log").overwriting(),
            )
            .await
            .unwrap();
        assert_eq!(store.mode(), StoreMode::Fallback);

        let primary_puts = primary.put_calls.load(Ordering::SeqCst);

        // A different key: served by the secondary without consulting the
        // primary first.
        store
            .store(
                "log:2",
                json!("second"),
                RecordMetadata::typed("log").overwriting(),
            )
            .await
            .unwrap();
        assert_eq!(primary.put_calls.load(Ordering::SeqCst), primary_puts);

        let back = store.retrieve("log:2").await.unwrap();
        assert_eq!(back.data, json!("second"));
    }

    #[tokio::test]
    async fn reset_returns_routing_to_primary() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        primary.fail_everything();
        store
            .store("log:1", json!("x"), RecordMetadata::typed("log").overwriting())
            .await
            .unwrap();
        assert_eq!(store.mode(), StoreMode::Fallback);

        primary.fail_puts.store(false, Ordering::SeqCst);
        primary.fail_gets.store(false, Ordering::SeqCst);
        store.reset_to_primary();
        assert_eq!(store.mode(), StoreMode::Primary);

        store
            .store("log:3", json!("y"), RecordMetadata::typed("log").overwriting())
            .await
            .unwrap();
        assert!(primary.inner.get("log:3").await.is_ok());
    }

    #[tokio::test]
    async fn exhaustion_of_both_backends_raises() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        primary.fail_everything();
        secondary.fail_everything();

        let err = store
            .store("log:1", json!("x"), RecordMetadata::typed("log").overwriting())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn type_conflict_is_rejected_without_overwrite() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(primary, secondary);

        store
            .store("task:t-1", json!({"v": 1}), RecordMetadata::typed("task"))
            .await
            .unwrap();

        let err = store
            .store("task:t-1", json!("thought"), RecordMetadata::typed("cot"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeConflict { .. }));

        // Same type without overwrite is append-by-convention: allowed.
        store
            .store("task:t-1", json!({"v": 2}), RecordMetadata::typed("task"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retrieve_consults_other_backend_on_absence() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        // Written during a failover window, then mode reset.
        secondary
            .inner
            .put(&StorageRecord::new(
                "task:t-7",
                json!({"status": "completed"}),
                RecordMetadata::typed("task"),
            ))
            .await
            .unwrap();

        let back = store.retrieve("task:t-7").await.unwrap();
        assert_eq!(back.data, json!({"status": "completed"}));
        assert_eq!(store.mode(), StoreMode::Primary);
    }

    #[tokio::test]
    async fn sync_batches_unsynced_logs_and_marks_them() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        for n in 0..3 {
            store
                .store(
                    format!("log:{n}"),
                    json!({"entry": n}),
                    RecordMetadata::typed("log").by_agent("observer"),
                )
                .await
                .unwrap();
        }

        let synced = store.sync_once(64 * 1024).await.unwrap();
        assert_eq!(synced, 3);

        let batches = store
            .search(keys::BATCH_PREFIX, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].data["count"], json!(3));

        // All constituents are now marked; a second pass sends nothing.
        let remaining = store.sync_once(64 * 1024).await.unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn sync_respects_batch_budget() {
        let primary = Arc::new(FlakyStore::new());
        let secondary = Arc::new(FlakyStore::new());
        let store = dual(Arc::clone(&primary), Arc::clone(&secondary));

        for n in 0..4 {
            store
                .store(
                    format!("log:{n}"),
                    json!({"payload": "x".repeat(512)}),
                    RecordMetadata::typed("log"),
                )
                .await
                .unwrap();
        }

        // Budget fits roughly one record per pass.
        let first = store.sync_once(600).await.unwrap();
        assert_eq!(first, 1);
        let second = store.sync_once(600).await.unwrap();
        assert_eq!(second, 1);
    }
}
