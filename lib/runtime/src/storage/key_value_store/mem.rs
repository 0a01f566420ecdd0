// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng as _;
use tokio::sync::Mutex;

use super::{Key, KeyValueBucket, KeyValueStore, StoreError, StoreOutcome};

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
    connection_id: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryStoreInner {
    data: Mutex<HashMap<String, MemoryBucket>>,
}

pub struct MemoryBucketRef {
    name: String,
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryBucket {
    data: HashMap<String, bytes::Bytes>,
    /// index name -> member -> score
    indexes: HashMap<String, HashMap<String, f64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            inner: Arc::new(MemoryStoreInner {
                data: Mutex::new(HashMap::new()),
            }),
            connection_id: rand::rng().random(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_or_create_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Box<dyn KeyValueBucket>, StoreError> {
        let mut locked_data = self.inner.data.lock().await;
        // Ensure the bucket exists
        locked_data.entry(bucket_name.to_string()).or_default();
        // Return an object able to access it
        Ok(Box::new(MemoryBucketRef {
            name: bucket_name.to_string(),
            inner: self.inner.clone(),
        }))
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

#[async_trait]
impl KeyValueBucket for MemoryBucketRef {
    async fn insert(&self, key: &Key, value: bytes::Bytes) -> Result<StoreOutcome, StoreError> {
        let mut locked_data = self.inner.data.lock().await;
        let Some(bucket) = locked_data.get_mut(&self.name) else {
            return Err(StoreError::MissingBucket(self.name.to_string()));
        };
        let outcome = match bucket.data.entry(key.to_string()) {
            Entry::Vacant(e) => {
                e.insert(value);
                StoreOutcome::Created
            }
            Entry::Occupied(mut e) => {
                e.insert(value);
                StoreOutcome::Updated
            }
        };
        Ok(outcome)
    }

    async fn get(&self, key: &Key) -> Result<Option<bytes::Bytes>, StoreError> {
        let locked_data = self.inner.data.lock().await;
        let Some(bucket) = locked_data.get(&self.name) else {
            return Ok(None);
        };
        Ok(bucket.data.get(key.as_ref()).cloned())
    }

    async fn delete(&self, key: &Key) -> Result<bool, StoreError> {
        let mut locked_data = self.inner.data.lock().await;
        let Some(bucket) = locked_data.get_mut(&self.name) else {
            return Err(StoreError::MissingBucket(self.name.to_string()));
        };
        Ok(bucket.data.remove(key.as_ref()).is_some())
    }

    async fn keys(&self) -> Result<Vec<Key>, StoreError> {
        let locked_data = self.inner.data.lock().await;
        match locked_data.get(&self.name) {
            Some(bucket) => Ok(bucket.data.keys().map(|k| Key::new(k.as_str())).collect()),
            None => Err(StoreError::MissingBucket(self.name.clone())),
        }
    }

    async fn entries(&self) -> Result<HashMap<Key, bytes::Bytes>, StoreError> {
        let locked_data = self.inner.data.lock().await;
        match locked_data.get(&self.name) {
            Some(bucket) => Ok(bucket
                .data
                .iter()
                .map(|(k, v)| (Key::new(k.as_str()), v.clone()))
                .collect()),
            None => Err(StoreError::MissingBucket(self.name.clone())),
        }
    }

    async fn index_add(&self, index: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut locked_data = self.inner.data.lock().await;
        let Some(bucket) = locked_data.get_mut(&self.name) else {
            return Err(StoreError::MissingBucket(self.name.to_string()));
        };
        bucket
            .indexes
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StoreError> {
        let mut locked_data = self.inner.data.lock().await;
        let Some(bucket) = locked_data.get_mut(&self.name) else {
            return Err(StoreError::MissingBucket(self.name.to_string()));
        };
        if let Some(members) = bucket.indexes.get_mut(index) {
            members.remove(member);
            if members.is_empty() {
                bucket.indexes.remove(index);
            }
        }
        Ok(())
    }

    async fn index_range(
        &self,
        index: &str,
        start: usize,
        stop: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let locked_data = self.inner.data.lock().await;
        let Some(members) = locked_data
            .get(&self.name)
            .and_then(|bucket| bucket.indexes.get(index))
        else {
            return Ok(vec![]);
        };
        Ok(super::ranked(members, start, stop))
    }

    async fn index_len(&self, index: &str) -> Result<usize, StoreError> {
        let locked_data = self.inner.data.lock().await;
        Ok(locked_data
            .get(&self.name)
            .and_then(|bucket| bucket.indexes.get(index))
            .map(|members| members.len())
            .unwrap_or(0))
    }
}
