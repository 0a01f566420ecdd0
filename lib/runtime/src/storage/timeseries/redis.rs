// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use ::redis::Value;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;

use super::{Aggregation, Sample, TimeSeriesStore};
use crate::storage::key_value_store::StoreError;

/// RedisTimeSeries module commands (TS.CREATE, TS.ADD, TS.RANGE, TS.INFO)
#[derive(Clone)]
pub struct RedisTimeSeries {
    conn: ConnectionManager,
}

impl RedisTimeSeries {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisTimeSeries { conn }
    }
}

#[async_trait]
impl TimeSeriesStore for RedisTimeSeries {
    async fn create(
        &self,
        key: &str,
        labels: &BTreeMap<String, String>,
        retention_ms: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("TS.CREATE");
        cmd.arg(key)
            .arg("RETENTION")
            .arg(retention_ms)
            .arg("DUPLICATE_POLICY")
            .arg("LAST");
        if !labels.is_empty() {
            cmd.arg("LABELS");
            for (name, value) in labels {
                cmd.arg(name).arg(value);
            }
        }
        let result: ::redis::RedisResult<()> = cmd.query_async(&mut conn).await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("already exists") => Ok(()),
            Err(err) => Err(to_redis_err(err)),
        }
    }

    async fn add_batch(&self, samples: &[Sample]) -> Result<usize, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut pipe = ::redis::pipe();
        for sample in samples {
            pipe.cmd("TS.ADD")
                .arg(&sample.key)
                .arg(sample.timestamp_ms)
                .arg(sample.value)
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await.map_err(to_redis_err)?;
        Ok(samples.len())
    }

    async fn range(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
        aggregation: Option<Aggregation>,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = ::redis::cmd("TS.RANGE");
        cmd.arg(key).arg(from_ms).arg(to_ms);
        if let Some(aggregation) = aggregation {
            cmd.arg("AGGREGATION")
                .arg(aggregation.kind.as_ref())
                .arg(aggregation.bucket_ms);
        }
        let raw: Vec<(i64, String)> = cmd.query_async(&mut conn).await.map_err(to_redis_err)?;
        Ok(raw
            .into_iter()
            .map(|(ts, value)| (ts, value.parse::<f64>().unwrap_or(f64::NAN)))
            .collect())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(to_redis_err)?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn labels(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        let result: ::redis::RedisResult<Value> =
            ::redis::cmd("TS.INFO").arg(key).query_async(&mut conn).await;
        let info = match result {
            Ok(info) => info,
            Err(err) if err.to_string().contains("does not exist") => {
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(to_redis_err(err)),
        };
        Ok(parse_info_labels(&info))
    }
}

/// Pulls the `labels` entry out of a TS.INFO reply, which is a flat list of
/// alternating field names and values (or a map under RESP3).
fn parse_info_labels(info: &Value) -> BTreeMap<String, String> {
    let labels = match info {
        Value::Array(items) => items
            .chunks(2)
            .find(|pair| as_string(&pair[0]).as_deref() == Some("labels"))
            .and_then(|pair| pair.get(1)),
        Value::Map(entries) => entries
            .iter()
            .find(|(name, _)| as_string(name).as_deref() == Some("labels"))
            .map(|(_, value)| value),
        _ => None,
    };
    let mut out = BTreeMap::new();
    match labels {
        Some(Value::Array(pairs)) => {
            for pair in pairs {
                let Value::Array(kv) = pair else { continue };
                let [name, value] = kv.as_slice() else {
                    continue;
                };
                if let (Some(name), Some(value)) = (as_string(name), as_string(value)) {
                    out.insert(name, value);
                }
            }
        }
        Some(Value::Map(entries)) => {
            for (name, value) in entries {
                if let (Some(name), Some(value)) = (as_string(name), as_string(value)) {
                    out.insert(name, value);
                }
            }
        }
        _ => {}
    }
    out
}

fn as_string(value: &Value) -> Option<String> {
    ::redis::from_redis_value::<String>(value).ok()
}

fn to_redis_err(err: ::redis::RedisError) -> StoreError {
    StoreError::RedisError(err.to_string())
}
