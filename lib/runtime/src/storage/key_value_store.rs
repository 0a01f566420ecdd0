// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interface to a traditional key-value store such as Redis.
//! "key_value_store" spelt out because in AI land "KV" means something else.
//!
//! A bucket is a namespace of keys. On Redis a bucket named `nim` holding key
//! `meta/llama` is the Redis key `nim:meta/llama`, so existing deployments keep
//! their data. Each bucket also owns any number of sorted secondary indexes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::{env, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::environment_names::store as env_store;
use crate::storage::timeseries::{MemoryTimeSeries, RedisTimeSeries, TimeSeriesStore};

mod mem;
pub use mem::MemoryStore;
mod file;
pub use file::FileStore;
mod redis;
pub use redis::RedisStore;

/// String we use as the Key in a key-value storage operation.
/// Does not include the bucket name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn new(s: impl Into<String>) -> Key {
        Key(s.into())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Key {
        Key::new(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Key {
        Key(s)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&Key> for String {
    fn from(k: &Key) -> String {
        k.0.clone()
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_or_create_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Box<dyn KeyValueBucket>, StoreError>;

    fn connection_id(&self) -> u64;

    fn shutdown(&self) {}
}

/// An online storage for key-value records with sorted secondary indexes.
#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    /// Insert or overwrite a value.
    async fn insert(&self, key: &Key, value: bytes::Bytes) -> Result<StoreOutcome, StoreError>;

    /// Fetch an item from the key-value storage
    async fn get(&self, key: &Key) -> Result<Option<bytes::Bytes>, StoreError>;

    /// Delete an item from the bucket. Returns whether it existed.
    async fn delete(&self, key: &Key) -> Result<bool, StoreError>;

    /// Every key in the bucket, excluding index storage.
    async fn keys(&self) -> Result<Vec<Key>, StoreError>;

    /// The entries in this bucket, excluding index storage.
    async fn entries(&self) -> Result<HashMap<Key, bytes::Bytes>, StoreError>;

    /// Add or re-score `member` in the sorted index `index`.
    async fn index_add(&self, index: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Remove `member` from `index`. Missing members are not an error.
    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StoreError>;

    /// Members of `index` ordered by descending score, from position `start`
    /// up to and including `stop`. `None` means to the end.
    async fn index_range(
        &self,
        index: &str,
        start: usize,
        stop: Option<usize>,
    ) -> Result<Vec<String>, StoreError>;

    /// Number of members in `index`
    async fn index_len(&self, index: &str) -> Result<usize, StoreError>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreOutcome {
    /// The key did not exist before
    Created,
    /// An existing value was overwritten
    Updated,
}

impl fmt::Display for StoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOutcome::Created => write!(f, "Created"),
            StoreOutcome::Updated => write!(f, "Updated"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Could not find bucket '{0}'")]
    MissingBucket(String),

    #[error("Could not find key '{0}'")]
    MissingKey(String),

    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    #[error("Internal storage error: '{0}'")]
    ProviderError(String),

    #[error("Internal Redis error: {0}")]
    RedisError(String),

    #[error("Internal filesystem error: {0}")]
    FilesystemError(String),

    #[error("Error decoding bytes: {0}")]
    JSONDecodeError(#[from] serde_json::error::Error),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Selector {
    Redis(String),
    File(PathBuf),
    #[default]
    Memory,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Redis(url) => write!(f, "Redis({url})"),
            Selector::File(path) => write!(f, "File({})", path.display()),
            Selector::Memory => write!(f, "Memory"),
        }
    }
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Selector> {
        match s {
            "redis" => {
                let url = env::var(env_store::REDIS_URL)
                    .unwrap_or_else(|_| crate::config::DEFAULT_REDIS_URL.to_string());
                Ok(Self::Redis(url))
            }
            "file" => {
                let root = env::var(env_store::NIMKIT_FILE_STORE_ROOT)
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir().join("nimkit_store_kv"));
                Ok(Self::File(root))
            }
            "mem" => Ok(Self::Memory),
            x => anyhow::bail!("Unknown key-value store type '{x}'"),
        }
    }
}

impl TryFrom<String> for Selector {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Selector> {
        s.parse()
    }
}

impl Selector {
    /// Selector for the backend named in the runtime configuration
    pub fn from_config(config: &crate::config::RuntimeConfig) -> anyhow::Result<Selector> {
        match config.store.as_str() {
            "redis" => Ok(Self::Redis(config.redis_url.clone())),
            "file" => Ok(Self::File(PathBuf::from(&config.file_store_root))),
            other => other.parse(),
        }
    }
}

enum KeyValueStoreEnum {
    Memory(MemoryStore),
    File(FileStore),
    Redis(RedisStore),
}

impl KeyValueStoreEnum {
    async fn get_or_create_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Box<dyn KeyValueBucket>, StoreError> {
        use KeyValueStoreEnum::*;
        match self {
            Memory(x) => x.get_or_create_bucket(bucket_name).await,
            File(x) => x.get_or_create_bucket(bucket_name).await,
            Redis(x) => x.get_or_create_bucket(bucket_name).await,
        }
    }

    fn connection_id(&self) -> u64 {
        use KeyValueStoreEnum::*;
        match self {
            Memory(x) => x.connection_id(),
            File(x) => x.connection_id(),
            Redis(x) => x.connection_id(),
        }
    }

    fn shutdown(&self) {
        use KeyValueStoreEnum::*;
        match self {
            Memory(x) => x.shutdown(),
            File(x) => x.shutdown(),
            Redis(x) => x.shutdown(),
        }
    }
}

/// Handle to the configured storage backend. Cheap to clone.
///
/// Carries the time-series store too: on Redis both share one connection, the
/// memory and file backends keep series in process memory.
#[derive(Clone)]
pub struct Manager {
    store: Arc<KeyValueStoreEnum>,
    time_series: Arc<dyn TimeSeriesStore>,
}

impl Default for Manager {
    fn default() -> Self {
        Manager::memory()
    }
}

impl Manager {
    /// In-memory Manager for testing
    pub fn memory() -> Self {
        Self::new(
            KeyValueStoreEnum::Memory(MemoryStore::new()),
            Arc::new(MemoryTimeSeries::new()),
        )
    }

    pub fn file<P: Into<PathBuf>>(root: P) -> Self {
        Self::new(
            KeyValueStoreEnum::File(FileStore::new(root)),
            Arc::new(MemoryTimeSeries::new()),
        )
    }

    /// Connects eagerly, so an unreachable Redis fails here rather than on first request.
    pub async fn redis(url: &str) -> Result<Self, StoreError> {
        let store = RedisStore::connect(url).await?;
        let time_series = RedisTimeSeries::new(store.connection());
        Ok(Self::new(
            KeyValueStoreEnum::Redis(store),
            Arc::new(time_series),
        ))
    }

    pub async fn from_selector(selector: &Selector) -> Result<Self, StoreError> {
        match selector {
            Selector::Memory => Ok(Self::memory()),
            Selector::File(root) => Ok(Self::file(root.clone())),
            Selector::Redis(url) => Self::redis(url).await,
        }
    }

    fn new(s: KeyValueStoreEnum, time_series: Arc<dyn TimeSeriesStore>) -> Manager {
        Manager {
            store: Arc::new(s),
            time_series,
        }
    }

    pub async fn get_or_create_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Box<dyn KeyValueBucket>, StoreError> {
        self.store.get_or_create_bucket(bucket_name).await
    }

    pub fn time_series(&self) -> Arc<dyn TimeSeriesStore> {
        self.time_series.clone()
    }

    pub fn connection_id(&self) -> u64 {
        self.store.connection_id()
    }

    /// Fetch and decode a JSON value
    pub async fn load<T: for<'a> Deserialize<'a>>(
        &self,
        bucket: &str,
        key: &Key,
    ) -> Result<Option<T>, StoreError> {
        let bucket = self.store.get_or_create_bucket(bucket).await?;
        Ok(match bucket.get(key).await? {
            Some(bytes) => Some(serde_json::from_slice(bytes.as_ref())?),
            None => None,
        })
    }

    /// Encode and store a JSON value
    pub async fn save<T: Serialize + Send + Sync>(
        &self,
        bucket: &str,
        key: &Key,
        obj: &T,
    ) -> Result<StoreOutcome, StoreError> {
        let obj_json = serde_json::to_vec(obj)?;
        let bucket = self.store.get_or_create_bucket(bucket).await?;
        bucket.insert(key, obj_json.into()).await
    }

    /// Cleanup any temporary state.
    pub fn shutdown(&self) {
        self.store.shutdown()
    }
}

/// Orders index members like Redis ZREVRANGE: descending score, ties by descending member.
pub(crate) fn ranked(
    members: &HashMap<String, f64>,
    start: usize,
    stop: Option<usize>,
) -> Vec<String> {
    let mut sorted: Vec<(&String, &f64)> = members.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| b.0.cmp(a.0)));
    let take = match stop {
        Some(stop) if stop >= start => stop - start + 1,
        Some(_) => 0,
        None => usize::MAX,
    };
    sorted
        .into_iter()
        .skip(start)
        .take(take)
        .map(|(member, _)| member.clone())
        .collect()
}

/// Rejects keys and index names that could escape a bucket on the filesystem backend.
pub(crate) fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|p| p == ".." || p == ".") {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
