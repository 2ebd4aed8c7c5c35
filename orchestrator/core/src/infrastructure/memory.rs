// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! In-memory record store for development and testing.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::record::{MetadataFilter, RecordStore, StorageRecord, StoreError};

#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, StorageRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &StorageRecord) -> Result<(), StoreError> {
        self.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<StorageRecord, StoreError> {
        self.records
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn search(
        &self,
        prefix: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<StorageRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .filter(|entry| filter.matches(&entry.value().metadata))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
