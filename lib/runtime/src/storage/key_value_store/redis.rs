// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Redis backend. Bucket `b` key `k` lives at `b:k`, index `i` at the sorted set `b:index:i`.

use std::collections::HashMap;

use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;

use super::{Key, KeyValueBucket, KeyValueStore, StoreError, StoreOutcome};

/// Keys fetched per SCAN round trip
const SCAN_COUNT: usize = 500;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    connection_id: u64,
}

impl RedisStore {
    pub(super) async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url).map_err(to_redis_err)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(to_redis_err)?;
        tracing::info!(url, "Connected to Redis");
        Ok(RedisStore {
            conn,
            connection_id: rand::random::<u64>(),
        })
    }

    /// A handle on the shared multiplexed connection
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    /// Redis has no buckets, only key prefixes, so this never touches the server.
    async fn get_or_create_bucket(
        &self,
        bucket_name: &str,
    ) -> Result<Box<dyn KeyValueBucket>, StoreError> {
        Ok(Box::new(RedisBucket {
            name: bucket_name.to_string(),
            conn: self.conn.clone(),
        }))
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

pub struct RedisBucket {
    name: String,
    conn: ConnectionManager,
}

impl RedisBucket {
    fn full_key(&self, key: &Key) -> String {
        format!("{}:{}", self.name, key)
    }

    fn index_key(&self, index: &str) -> String {
        format!("{}:index:{}", self.name, index)
    }

    /// Full Redis keys of this bucket's records, without index keys
    async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.name);
        let index_prefix = format!("{}:index:", self.name);
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(to_redis_err)?;
            out.extend(batch.into_iter().filter(|k| !k.starts_with(&index_prefix)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    fn strip<'a>(&self, full: &'a str) -> &'a str {
        full.strip_prefix(&self.name)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(full)
    }
}

#[async_trait]
impl KeyValueBucket for RedisBucket {
    async fn insert(&self, key: &Key, value: bytes::Bytes) -> Result<StoreOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let full_key = self.full_key(key);
        let existed: bool = conn.exists(&full_key).await.map_err(to_redis_err)?;
        let _: () = conn
            .set(&full_key, value.as_ref())
            .await
            .map_err(to_redis_err)?;
        Ok(if existed {
            StoreOutcome::Updated
        } else {
            StoreOutcome::Created
        })
    }

    async fn get(&self, key: &Key) -> Result<Option<bytes::Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.full_key(key)).await.map_err(to_redis_err)?;
        Ok(value.map(bytes::Bytes::from))
    }

    async fn delete(&self, key: &Key) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(self.full_key(key)).await.map_err(to_redis_err)?;
        Ok(removed > 0)
    }

    async fn keys(&self) -> Result<Vec<Key>, StoreError> {
        Ok(self
            .scan_keys()
            .await?
            .iter()
            .map(|full| Key::new(self.strip(full)))
            .collect())
    }

    async fn entries(&self) -> Result<HashMap<Key, bytes::Bytes>, StoreError> {
        let full_keys = self.scan_keys().await?;
        if full_keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = ::redis::cmd("MGET")
            .arg(&full_keys)
            .query_async(&mut conn)
            .await
            .map_err(to_redis_err)?;
        Ok(full_keys
            .iter()
            .zip(values)
            // deleted between SCAN and MGET
            .filter_map(|(full, value)| {
                value.map(|v| (Key::new(self.strip(full)), bytes::Bytes::from(v)))
            })
            .collect())
    }

    async fn index_add(&self, index: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(self.index_key(index), member, score)
            .await
            .map_err(to_redis_err)?;
        Ok(())
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zrem(self.index_key(index), member)
            .await
            .map_err(to_redis_err)?;
        Ok(())
    }

    async fn index_range(
        &self,
        index: &str,
        start: usize,
        stop: Option<usize>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let stop = stop.map(|s| s as isize).unwrap_or(-1);
        let members: Vec<String> = conn
            .zrevrange(self.index_key(index), start as isize, stop)
            .await
            .map_err(to_redis_err)?;
        Ok(members)
    }

    async fn index_len(&self, index: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .zcard(self.index_key(index))
            .await
            .map_err(to_redis_err)?;
        Ok(len)
    }
}

pub(crate) fn to_redis_err(err: ::redis::RedisError) -> StoreError {
    StoreError::RedisError(err.to_string())
}
