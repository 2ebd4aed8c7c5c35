// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Concrete backends and process-level plumbing: the event bus, the
//! ledger-backed primary store, the content-addressed fallback store, and
//! the dual-backend routing policy over them.

pub mod event_bus;
pub mod fallback;
pub mod ledger;
pub mod memory;
pub mod task_log;

pub use event_bus::{EventBus, EventBusError, Subscription, TopicReceiver};
pub use fallback::FallbackStore;
pub use ledger::{HttpLedgerRpc, LedgerRpc, LedgerStore, NonceSequencer, RetryPolicy};
pub use memory::MemoryRecordStore;
pub use task_log::{StoreMode, SyncConfig, TaskLogStore};

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::domain::record::{RecordStore, StoreError};

/// Build the dual-backend task-log store a deployment runs: the ledger
/// gateway as primary, the local content-addressed store as fallback.
pub fn create_task_log_store(config: &StorageConfig) -> Result<TaskLogStore, StoreError> {
    let rpc: Arc<dyn LedgerRpc> = Arc::new(HttpLedgerRpc::new(config.ledger_endpoint.clone()));
    let primary = LedgerStore::new(
        rpc,
        config.account.clone(),
        config.bucket_alias.clone(),
        config.retry_policy(),
    );
    let secondary = FallbackStore::new(config.fallback_dir.clone())?;

    Ok(TaskLogStore::new(
        Arc::new(primary) as Arc<dyn RecordStore>,
        Arc::new(secondary) as Arc<dyn RecordStore>,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn factory_builds_the_deployment_pairing() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            fallback_dir: dir.path().to_string_lossy().to_string(),
            ..StorageConfig::default()
        };

        let store = create_task_log_store(&config).unwrap();
        assert_eq!(store.mode(), StoreMode::Primary);
    }
}
