// Copyright (c) 2026 Meridian Labs
// SPDX-License-Identifier: AGPL-3.0

//! Ledger-backed bucket store (primary backend).
//!
//! The primary backend is a ledger gateway whose bucket writes must carry a
//! strictly increasing per-account nonce. This module provides:
//!
//! - [`LedgerRpc`]: the gateway seam (HTTP adapter for deployments, mock
//!   for tests),
//! - [`NonceSequencer`]: serialized nonce acquisition with bounded retry,
//! - [`LedgerStore`]: the [`RecordStore`] implementation with lazy,
//!   process-lifetime bucket resolution.
//!
//! # Gateway API
//!
//! - `GET /accounts/{account}/transactions` - pending and latest counts
//! - `GET /buckets?alias=<alias>` - resolve bucket address
//! - `POST /buckets` - create bucket (nonced)
//! - `PUT /buckets/{address}/objects/{key}?nonce=<n>` - write object
//! - `GET /buckets/{address}/objects/{key}` - read object
//! - `GET /buckets/{address}/objects?prefix=<p>` - list keys

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::domain::record::{MetadataFilter, RecordStore, StorageRecord, StoreError};

/// Pending and latest transaction counts for a writer account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransactionCounts {
    pub pending: u64,
    pub latest: u64,
}

/// Backend-specific address a bucket alias resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketAddress(String);

impl BucketAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ledger gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("write rejected by ledger: {0}")]
    Rejected(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout while communicating with ledger gateway")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown ledger error: {0}")]
    Unknown(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else if err.is_connect() {
            LedgerError::Network(err.to_string())
        } else {
            LedgerError::Unknown(err.to_string())
        }
    }
}

/// Ledger gateway seam.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn transaction_counts(&self, account: &str) -> Result<TransactionCounts, LedgerError>;

    async fn find_bucket(&self, alias: &str) -> Result<Option<BucketAddress>, LedgerError>;

    async fn create_bucket(&self, alias: &str, nonce: u64) -> Result<BucketAddress, LedgerError>;

    async fn put_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
        body: serde_json::Value,
        nonce: u64,
    ) -> Result<(), LedgerError>;

    async fn get_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
    ) -> Result<serde_json::Value, LedgerError>;

    async fn list_keys(
        &self,
        bucket: &BucketAddress,
        prefix: &str,
    ) -> Result<Vec<String>, LedgerError>;
}

/// HTTP adapter for the ledger gateway.
pub struct HttpLedgerRpc {
    client: Client,
    base_url: String,
}

impl HttpLedgerRpc {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
struct BucketEnvelope {
    address: String,
}

#[derive(Debug, Deserialize)]
struct KeyListing {
    keys: Vec<String>,
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn transaction_counts(&self, account: &str) -> Result<TransactionCounts, LedgerError> {
        let url = self.build_url(&format!("/accounts/{account}/transactions"));

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let counts: TransactionCounts = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(counts)
            }
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(account.to_string())),
            status => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(LedgerError::Unknown(format!(
                    "Failed to read transaction counts for {}: {}",
                    account, error_msg
                )))
            }
        }
    }

    async fn find_bucket(&self, alias: &str) -> Result<Option<BucketAddress>, LedgerError> {
        let url = self.build_url("/buckets");

        let response = self
            .client
            .get(&url)
            .query(&[("alias", alias)])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let envelope: BucketEnvelope = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(Some(BucketAddress::new(envelope.address)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(LedgerError::Unknown(format!(
                    "Failed to resolve bucket {}: {}",
                    alias, error_msg
                )))
            }
        }
    }

    async fn create_bucket(&self, alias: &str, nonce: u64) -> Result<BucketAddress, LedgerError> {
        let url = self.build_url("/buckets");

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "alias": alias, "nonce": nonce }))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let envelope: BucketEnvelope = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(BucketAddress::new(envelope.address))
            }
            StatusCode::CONFLICT => Err(LedgerError::Rejected(format!(
                "bucket creation for {} rejected (nonce {})",
                alias, nonce
            ))),
            status => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(LedgerError::Unknown(format!(
                    "Failed to create bucket {}: {}",
                    alias, error_msg
                )))
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
        body: serde_json::Value,
        nonce: u64,
    ) -> Result<(), LedgerError> {
        let url = self.build_url(&format!("/buckets/{}/objects/{}", bucket.as_str(), key));

        let response = self
            .client
            .put(&url)
            .query(&[("nonce", nonce.to_string())])
            .json(&body)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => Err(LedgerError::Rejected(format!(
                "write of {} rejected (nonce {})",
                key, nonce
            ))),
            status => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(LedgerError::Unknown(format!(
                    "Failed to write {}: {}",
                    key, error_msg
                )))
            }
        }
    }

    async fn get_object(
        &self,
        bucket: &BucketAddress,
        key: &str,
    ) -> Result<serde_json::Value, LedgerError> {
        let url = self.build_url(&format!("/buckets/{}/objects/{}", bucket.as_str(), key));

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(body)
            }
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(key.to_string())),
            status => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(LedgerError::Unknown(format!(
                    "Failed to read {}: {}",
                    key, error_msg
                )))
            }
        }
    }

    async fn list_keys(
        &self,
        bucket: &BucketAddress,
        prefix: &str,
    ) -> Result<Vec<String>, LedgerError> {
        let url = self.build_url(&format!("/buckets/{}/objects", bucket.as_str()));

        let response = self
            .client
            .get(&url)
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let listing: KeyListing = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?;
                Ok(listing.keys)
            }
            status => {
                let error_msg = response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP {}", status));
                Err(LedgerError::Unknown(format!(
                    "Failed to list keys under {}: {}",
                    prefix, error_msg
                )))
            }
        }
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Serialized per-account nonce acquisition.
///
/// The ledger accepts a write only if its nonce is strictly greater than
/// every nonce it has seen for the account, so concurrent acquisitions
/// must not hand out the same value. Acquisition holds an async mutex for
/// the whole read-increment cycle and floors the result at the last value
/// issued locally, which keeps the sequence strictly increasing even when
/// the gateway's counts lag behind our own writes.
pub struct NonceSequencer {
    rpc: Arc<dyn LedgerRpc>,
    account: String,
    retry: RetryPolicy,
    last_issued: Mutex<u64>,
}

impl NonceSequencer {
    pub fn new(rpc: Arc<dyn LedgerRpc>, account: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            rpc,
            account: account.into(),
            retry,
            last_issued: Mutex::new(0),
        }
    }

    /// Acquire the next nonce for this account.
    pub async fn next(&self) -> Result<u64, StoreError> {
        let mut last = self.last_issued.lock().await;

        let mut attempt = 0;
        let counts = loop {
            match self.rpc.transaction_counts(&self.account).await {
                Ok(counts) => break counts,
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        return Err(StoreError::NonceExhausted {
                            attempts: attempt,
                            reason: err.to_string(),
                        });
                    }
                    warn!(
                        account = %self.account,
                        attempt,
                        error = %err,
                        "transaction count read failed; retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        };

        let next = counts.pending.max(counts.latest).max(*last) + 1;
        *last = next;
        debug!(account = %self.account, nonce = next, "nonce acquired");
        Ok(next)
    }
}

/// [`RecordStore`] over the ledger gateway.
pub struct LedgerStore {
    rpc: Arc<dyn LedgerRpc>,
    sequencer: NonceSequencer,
    bucket_alias: String,
    retry: RetryPolicy,
    bucket: OnceCell<BucketAddress>,
}

impl LedgerStore {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        account: impl Into<String>,
        bucket_alias: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        let sequencer = NonceSequencer::new(Arc::clone(&rpc), account, retry);
        Self {
            rpc,
            sequencer,
            bucket_alias: bucket_alias.into(),
            retry,
            bucket: OnceCell::new(),
        }
    }

    pub fn sequencer(&self) -> &NonceSequencer {
        &self.sequencer
    }

    /// Resolve the bucket for our alias, creating it if it does not exist.
    /// The address is cached for the process lifetime; concurrent resolvers
    /// race and the first one wins.
    async fn bucket(&self) -> Result<&BucketAddress, StoreError> {
        self.bucket
            .get_or_try_init(|| async {
                match self.rpc.find_bucket(&self.bucket_alias).await {
                    Ok(Some(address)) => {
                        debug!(alias = %self.bucket_alias, address = address.as_str(), "bucket resolved");
                        Ok(address)
                    }
                    Ok(None) => self.create_bucket().await,
                    Err(err) => Err(StoreError::Bucket {
                        alias: self.bucket_alias.clone(),
                        reason: err.to_string(),
                    }),
                }
            })
            .await
    }

    async fn create_bucket(&self) -> Result<BucketAddress, StoreError> {
        let mut attempt = 0;
        loop {
            let nonce = self.sequencer.next().await?;
            match self.rpc.create_bucket(&self.bucket_alias, nonce).await {
                Ok(address) => {
                    info!(
                        alias = %self.bucket_alias,
                        address = address.as_str(),
                        "bucket created"
                    );
                    return Ok(address);
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        return Err(StoreError::Bucket {
                            alias: self.bucket_alias.clone(),
                            reason: err.to_string(),
                        });
                    }
                    warn!(
                        alias = %self.bucket_alias,
                        attempt,
                        error = %err,
                        "bucket creation failed; retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl RecordStore for LedgerStore {
    async fn put(&self, record: &StorageRecord) -> Result<(), StoreError> {
        let bucket = self.bucket().await?.clone();
        let nonce = self.sequencer.next().await?;
        let body = serde_json::to_value(record)?;
        self.rpc
            .put_object(&bucket, &record.key, body, nonce)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn get(&self, key: &str) -> Result<StorageRecord, StoreError> {
        let bucket = self.bucket().await?.clone();
        let body = match self.rpc.get_object(&bucket, key).await {
            Ok(body) => body,
            Err(LedgerError::NotFound(_)) => return Err(StoreError::NotFound(key.to_string())),
            Err(err) => return Err(StoreError::Backend(err.to_string())),
        };
        Ok(serde_json::from_value(body)?)
    }

    async fn search(
        &self,
        prefix: &str,
        filter: &MetadataFilter,
    ) -> Result<Vec<StorageRecord>, StoreError> {
        let bucket = self.bucket().await?.clone();
        let keys = self
            .rpc
            .list_keys(&bucket, prefix)
            .await
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let mut records = Vec::new();
        for key in keys {
            let body = match self.rpc.get_object(&bucket, &key).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unreadable record in search");
                    continue;
                }
            };
            match serde_json::from_value::<StorageRecord>(body) {
                Ok(record) if filter.matches(&record.metadata) => records.push(record),
                Ok(_) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unparsable record in search");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::RecordMetadata;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// In-memory ledger gateway with failure injection.
    struct MockLedgerRpc {
        counts: parking_lot::Mutex<TransactionCounts>,
        buckets: parking_lot::Mutex<HashMap<String, BucketAddress>>,
        objects: parking_lot::Mutex<HashMap<String, serde_json::Value>>,
        fail_counts: AtomicBool,
        count_calls: AtomicU32,
    }

    impl MockLedgerRpc {
        fn new() -> Self {
            Self {
                counts: parking_lot::Mutex::new(TransactionCounts {
                    pending: 4,
                    latest: 2,
                }),
                buckets: parking_lot::Mutex::new(HashMap::new()),
                objects: parking_lot::Mutex::new(HashMap::new()),
                fail_counts: AtomicBool::new(false),
                count_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerRpc for MockLedgerRpc {
        async fn transaction_counts(
            &self,
            _account: &str,
        ) -> Result<TransactionCounts, LedgerError> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_counts.load(Ordering::SeqCst) {
                return Err(LedgerError::Network("gateway down".to_string()));
            }
            Ok(*self.counts.lock())
        }

        async fn find_bucket(&self, alias: &str) -> Result<Option<BucketAddress>, LedgerError> {
            Ok(self.buckets.lock().get(alias).cloned())
        }

        async fn create_bucket(
            &self,
            alias: &str,
            _nonce: u64,
        ) -> Result<BucketAddress, LedgerError> {
            let address = BucketAddress::new(format!("0x{:08x}", self.buckets.lock().len() + 1));
            self.buckets
                .lock()
                .insert(alias.to_string(), address.clone());
            Ok(address)
        }

        async fn put_object(
            &self,
            _bucket: &BucketAddress,
            key: &str,
            body: serde_json::Value,
            _nonce: u64,
        ) -> Result<(), LedgerError> {
            self.objects.lock().insert(key.to_string(), body);
            Ok(())
        }

        async fn get_object(
            &self,
            _bucket: &BucketAddress,
            key: &str,
        ) -> Result<serde_json::Value, LedgerError> {
            self.objects
                .lock()
                .get(key)
                .cloned()
                .ok_or_else(|| LedgerError::NotFound(key.to_string()))
        }

        async fn list_keys(
            &self,
            _bucket: &BucketAddress,
            prefix: &str,
        ) -> Result<Vec<String>, LedgerError> {
            Ok(self
                .objects
                .lock()
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn nonce_uses_max_of_pending_and_latest() {
        let rpc = Arc::new(MockLedgerRpc::new());
        let sequencer = NonceSequencer::new(rpc, "0.0.1001", RetryPolicy::default());

        // pending=4, latest=2 -> first nonce is 5.
        assert_eq!(sequencer.next().await.unwrap(), 5);
        // Counts unchanged upstream; local floor keeps the sequence moving.
        assert_eq!(sequencer.next().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn concurrent_nonce_acquisitions_are_strictly_increasing() {
        let rpc = Arc::new(MockLedgerRpc::new());
        let sequencer = Arc::new(NonceSequencer::new(
            rpc,
            "0.0.1001",
            RetryPolicy::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sequencer = Arc::clone(&sequencer);
            handles.push(tokio::spawn(async move { sequencer.next().await.unwrap() }));
        }

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        nonces.sort_unstable();

        let mut deduped = nonces.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 16, "nonces must be distinct: {nonces:?}");
        for pair in nonces.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn nonce_acquisition_retries_then_surfaces_error() {
        let rpc = Arc::new(MockLedgerRpc::new());
        rpc.fail_counts.store(true, Ordering::SeqCst);
        let sequencer = NonceSequencer::new(
            Arc::clone(&rpc) as Arc<dyn LedgerRpc>,
            "0.0.1001",
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(10),
            },
        );

        let err = sequencer.next().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::NonceExhausted { attempts: 3, .. }
        ));
        assert_eq!(rpc.count_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bucket_is_created_once_and_cached() {
        let rpc = Arc::new(MockLedgerRpc::new());
        let store = LedgerStore::new(
            Arc::clone(&rpc) as Arc<dyn LedgerRpc>,
            "0.0.1001",
            "meridian-task-log",
            RetryPolicy::default(),
        );

        let record = StorageRecord::new("task:a", json!({"status": "pending"}), RecordMetadata::typed("task"));
        store.put(&record).await.unwrap();
        store.put(&record).await.unwrap();

        assert_eq!(rpc.buckets.lock().len(), 1);
    }

    #[tokio::test]
    async fn round_trip_preserves_data_and_metadata() {
        let rpc = Arc::new(MockLedgerRpc::new());
        let store = LedgerStore::new(
            rpc,
            "0.0.1001",
            "meridian-task-log",
            RetryPolicy::default(),
        );

        let mut metadata = RecordMetadata::typed("cot").by_agent("observer");
        metadata.extra.insert("round".to_string(), json!(7));
        let record = StorageRecord::new("cot:t-1", json!({"thought": "check rates"}), metadata);

        store.put(&record).await.unwrap();
        let back = store.get("cot:t-1").await.unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn search_filters_by_prefix_and_metadata() {
        let rpc = Arc::new(MockLedgerRpc::new());
        let store = LedgerStore::new(
            rpc,
            "0.0.1001",
            "meridian-task-log",
            RetryPolicy::default(),
        );

        for (key, agent) in [("log:1", "observer"), ("log:2", "hedera"), ("task:1", "observer")] {
            let record = StorageRecord::new(
                key,
                json!({"entry": key}),
                RecordMetadata::typed("log").by_agent(agent),
            );
            store.put(&record).await.unwrap();
        }

        let all_logs = store
            .search("log:", &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(all_logs.len(), 2);

        let observer_logs = store
            .search(
                "log:",
                &MetadataFilter::default().with("agent", json!("observer")),
            )
            .await
            .unwrap();
        assert_eq!(observer_logs.len(), 1);
        assert_eq!(observer_logs[0].key, "log:1");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let rpc = Arc::new(MockLedgerRpc::new());
        let store = LedgerStore::new(
            rpc,
            "0.0.1001",
            "meridian-task-log",
            RetryPolicy::default(),
        );

        let err = store.get("task:missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
