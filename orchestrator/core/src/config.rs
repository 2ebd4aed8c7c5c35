// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Runtime configuration, loaded from a YAML file with environment
//! overrides for the deployment-sensitive values. Everything has a
//! default so tests and local development run with no file at all.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::infrastructure::ledger::RetryPolicy;
use crate::infrastructure::task_log::SyncConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeridianConfig {
    pub bus: BusConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub sync: SyncSettings,
    pub routing: Vec<RoutingRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7300".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub ledger_endpoint: String,
    pub account: String,
    pub bucket_alias: String,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub fallback_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ledger_endpoint: "http://localhost:26658".to_string(),
            account: "0.0.0".to_string(),
            bucket_alias: "meridian-task-log".to_string(),
            retry_attempts: 3,
            retry_delay_ms: 500,
            fallback_dir: "/var/lib/meridian/fallback".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub batch_budget_kb: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_budget_kb: 64,
        }
    }
}

impl SyncSettings {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_secs(self.interval_secs),
            batch_budget_kb: self.batch_budget_kb,
        }
    }
}

/// One keyword-to-worker entry for the routing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub keyword: String,
    pub worker: String,
}

impl MeridianConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config = serde_yaml::from_str(&text)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        Ok(config.apply_env())
    }

    /// `MERIDIAN_LEDGER_ENDPOINT`, `MERIDIAN_ACCOUNT`,
    /// `MERIDIAN_FALLBACK_DIR` and `MERIDIAN_API_BIND` override their file
    /// counterparts.
    pub fn apply_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("MERIDIAN_LEDGER_ENDPOINT") {
            self.storage.ledger_endpoint = endpoint;
        }
        if let Ok(account) = std::env::var("MERIDIAN_ACCOUNT") {
            self.storage.account = account;
        }
        if let Ok(dir) = std::env::var("MERIDIAN_FALLBACK_DIR") {
            self.storage.fallback_dir = dir;
        }
        if let Ok(bind) = std::env::var("MERIDIAN_API_BIND") {
            self.api.bind = bind;
        }
        self
    }
}
