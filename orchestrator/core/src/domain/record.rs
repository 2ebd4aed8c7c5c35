// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Durable record types and the storage backend seam.
//!
//! The orchestration core persists through [`RecordStore`], an
//! anti-corruption layer over the concrete backends in
//! `crate::infrastructure` (ledger-backed primary, content-addressed
//! fallback, in-memory for development). The dual-backend routing policy
//! lives in `crate::infrastructure::task_log`, not here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::task::TaskId;

/// Key namespace helpers. Keys are hierarchical by convention:
/// `task:<id>`, `cot:<id>`, `log:<id>`, `batch:<millis>`.
pub mod keys {
    use super::*;

    pub const TASK_PREFIX: &str = "task:";
    pub const COT_PREFIX: &str = "cot:";
    pub const LOG_PREFIX: &str = "log:";
    pub const BATCH_PREFIX: &str = "batch:";

    pub fn task(id: &TaskId) -> String {
        format!("{TASK_PREFIX}{id}")
    }

    pub fn chain_of_thought(id: &TaskId) -> String {
        format!("{COT_PREFIX}{id}")
    }

    pub fn log(suffix: &str) -> String {
        format!("{LOG_PREFIX}{suffix}")
    }

    pub fn batch(millis: i64) -> String {
        format!("{BATCH_PREFIX}{millis}")
    }
}

/// Record metadata. The orchestration core reserves `agent`, `timestamp`,
/// `type` and `overwrite`; anything else rides along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    /// Records are append-only by convention; with `overwrite` set the
    /// latest write for a key wins.
    #[serde(default)]
    pub overwrite: bool,
    /// Set by the periodic synchronizer once the record has been included
    /// in a `batch:` write.
    #[serde(default)]
    pub synced: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RecordMetadata {
    pub fn typed(record_type: impl Into<String>) -> Self {
        Self {
            record_type: Some(record_type.into()),
            timestamp: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn by_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn overwriting(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

/// The durable representation of a stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub key: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl StorageRecord {
    pub fn new(key: impl Into<String>, data: serde_json::Value, metadata: RecordMetadata) -> Self {
        Self {
            key: key.into(),
            data,
            metadata,
        }
    }

    /// Serialized size, used by the synchronizer's batch budget.
    pub fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

/// Client-side metadata filter for [`RecordStore::search`]: every entry
/// must match the record's serialized metadata exactly.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter(pub HashMap<String, serde_json::Value>);

impl MetadataFilter {
    pub fn with(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.0.insert(field.into(), value);
        self
    }

    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let serialized = match serde_json::to_value(metadata) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return false,
        };
        self.0
            .iter()
            .all(|(field, expected)| serialized.get(field) == Some(expected))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record type conflict for {key}: stored {stored:?}, attempted {attempted:?}")]
    TypeConflict {
        key: String,
        stored: Option<String>,
        attempted: Option<String>,
    },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("nonce acquisition failed after {attempts} attempts: {reason}")]
    NonceExhausted { attempts: u32, reason: String },

    #[error("bucket resolution failed for alias {alias}: {reason}")]
    Bucket { alias: String, reason: String },

    #[error("both storage backends failed for {key}: primary: {primary}; fallback: {fallback}")]
    Exhausted {
        key: String,
        primary: String,
        fallback: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Storage backend seam. One implementation per backend; the fallback
/// policy composes two of these.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, record: &StorageRecord) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<StorageRecord, StoreError>;

    /// Prefix query over stored keys with client-side metadata filtering.
    /// Backends without native search return an empty result set.
    async fn search(
        &self,
        prefix: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<StorageRecord>, StoreError>;
}
