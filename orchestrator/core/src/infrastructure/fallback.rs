// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Content-addressed filesystem store (secondary backend).
//!
//! Used only while the primary ledger backend is failed over. Records are
//! written to a flat directory, addressed by the SHA-256 of their key, so
//! retrieval needs nothing but the key itself. The backend offers no
//! native search and returns an empty result set; the routing policy in
//! `task_log` documents this asymmetry.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::record::{MetadataFilter, RecordStore, StorageRecord, StoreError};

pub struct FallbackStore {
    base_path: PathBuf,
}

impl FallbackStore {
    /// Create the store, verifying the base directory exists and is
    /// writable before the first failover needs it.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path).map_err(|e| {
            StoreError::Io(format!(
                "Failed to create fallback directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        let probe = base_path.join(".meridian-store-probe");
        std::fs::write(&probe, b"probe").map_err(|e| {
            StoreError::Io(format!(
                "Fallback directory {} is not writable: {}",
                base_path.display(),
                e
            ))
        })?;
        std::fs::remove_file(&probe)
            .map_err(|e| StoreError::Io(format!("Failed to clean up probe file: {}", e)))?;

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.base_path.join(format!("{digest}.json"))
    }
}

#[async_trait]
impl RecordStore for FallbackStore {
    async fn put(&self, record: &StorageRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        std::fs::write(self.object_path(&record.key), bytes)
            .map_err(|e| StoreError::Io(format!("Failed to write {}: {}", record.key, e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StorageRecord, StoreError> {
        let path = self.object_path(key);
        if !path.exists() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| StoreError::Io(format!("Failed to read {}: {}", key, e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn search(
        &self,
        prefix: &str,
        _filter: &MetadataFilter,
    ) -> Result<Vec<StorageRecord>, StoreError> {
        // Keys are stored hashed; there is nothing to prefix-scan.
        debug!(prefix, "fallback store has no native search");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::RecordMetadata;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trip_preserves_data_and_metadata() {
        let dir = TempDir::new().unwrap();
        let store = FallbackStore::new(dir.path()).unwrap();

        let mut metadata = RecordMetadata::typed("task").by_agent("hedera");
        metadata.extra.insert("chain".to_string(), json!("hedera"));
        let record = StorageRecord::new("task:t-9", json!({"status": "pending"}), metadata);

        store.put(&record).await.unwrap();
        let back = store.get("task:t-9").await.unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FallbackStore::new(dir.path()).unwrap();

        let err = store.get("task:absent").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn search_returns_empty_set() {
        let dir = TempDir::new().unwrap();
        let store = FallbackStore::new(dir.path()).unwrap();

        let record = StorageRecord::new("log:1", json!("entry"), RecordMetadata::typed("log"));
        store.put(&record).await.unwrap();

        let results = store
            .search("log:", &MetadataFilter::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn overwrite_keeps_latest_write() {
        let dir = TempDir::new().unwrap();
        let store = FallbackStore::new(dir.path()).unwrap();

        let first = StorageRecord::new("task:t-1", json!({"v": 1}), RecordMetadata::typed("task"));
        let second = StorageRecord::new("task:t-1", json!({"v": 2}), RecordMetadata::typed("task"));
        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        let back = store.get("task:t-1").await.unwrap();
        assert_eq!(back.data, json!({"v": 2}));
    }
}
