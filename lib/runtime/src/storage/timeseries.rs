// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Time-series storage, modeled on RedisTimeSeries.
//!
//! A series is identified by a key, carries a set of string labels and keeps
//! samples for a retention window. Writing the same timestamp twice keeps the
//! last value.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::key_value_store::StoreError;

mod mem;
pub use mem::MemoryTimeSeries;
mod redis;
pub use redis::RedisTimeSeries;

/// One point to append to a series
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub key: String,
    pub timestamp_ms: i64,
    pub value: f64,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AggregationKind {
    Avg,
    Sum,
    Min,
    Max,
    Count,
}

/// Downsampling applied to a range query: one point per `bucket_ms` window,
/// stamped with the window start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregation {
    pub kind: AggregationKind,
    pub bucket_ms: u64,
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Create a series. Creating one that already exists is not an error.
    async fn create(
        &self,
        key: &str,
        labels: &BTreeMap<String, String>,
        retention_ms: u64,
    ) -> Result<(), StoreError>;

    /// Append samples in one round trip. Returns how many were written.
    async fn add_batch(&self, samples: &[Sample]) -> Result<usize, StoreError>;

    /// Points with `from_ms <= ts <= to_ms`, oldest first
    async fn range(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
        aggregation: Option<Aggregation>,
    ) -> Result<Vec<(i64, f64)>, StoreError>;

    /// Keys of all series starting with `prefix`, sorted
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Labels of a series, empty when it does not exist
    async fn labels(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;
}

/// Downsamples sorted points the way TS.RANGE AGGREGATION does.
pub(crate) fn aggregate(points: &[(i64, f64)], aggregation: Aggregation) -> Vec<(i64, f64)> {
    let bucket = i64::try_from(aggregation.bucket_ms).unwrap_or(i64::MAX).max(1);
    let mut out: Vec<(i64, f64)> = Vec::new();
    let mut current: Option<(i64, Vec<f64>)> = None;

    let flush = |window: i64, values: &[f64], out: &mut Vec<(i64, f64)>| {
        let value = match aggregation.kind {
            AggregationKind::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AggregationKind::Sum => values.iter().sum(),
            AggregationKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregationKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationKind::Count => values.len() as f64,
        };
        out.push((window, value));
    };

    for &(ts, value) in points {
        let window = ts - ts.rem_euclid(bucket);
        match current.as_mut() {
            Some((w, values)) if *w == window => values.push(value),
            _ => {
                if let Some((w, values)) = current.take() {
                    flush(w, &values, &mut out);
                }
                current = Some((window, vec![value]));
            }
        }
    }
    if let Some((w, values)) = current {
        flush(w, &values, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AggregationKind::Avg, vec![(0, 2.0), (10, 6.0)])]
    #[case(AggregationKind::Sum, vec![(0, 4.0), (10, 6.0)])]
    #[case(AggregationKind::Min, vec![(0, 1.0), (10, 6.0)])]
    #[case(AggregationKind::Max, vec![(0, 3.0), (10, 6.0)])]
    #[case(AggregationKind::Count, vec![(0, 2.0), (10, 1.0)])]
    fn test_aggregate(#[case] kind: AggregationKind, #[case] expected: Vec<(i64, f64)>) {
        let points = [(1, 1.0), (9, 3.0), (12, 6.0)];
        let got = aggregate(
            &points,
            Aggregation {
                kind,
                bucket_ms: 10,
            },
        );
        assert_eq!(got, expected);
    }

    #[test]
    fn test_aggregate_oversized_bucket() {
        let points = [(1, 1.0), (9, 3.0), (12, 6.0)];
        let got = aggregate(
            &points,
            Aggregation {
                kind: AggregationKind::Sum,
                bucket_ms: u64::MAX,
            },
        );
        assert_eq!(got, vec![(0, 10.0)]);
    }

    #[test]
    fn test_aggregation_kind_parse() {
        assert_eq!("avg".parse::<AggregationKind>().ok(), Some(AggregationKind::Avg));
        assert_eq!(AggregationKind::Count.to_string(), "count");
        assert!("median".parse::<AggregationKind>().is_err());
    }

    #[tokio::test]
    async fn test_memory_series_lifecycle() -> anyhow::Result<()> {
        let ts = MemoryTimeSeries::new();
        let labels = BTreeMap::from([
            ("metric".to_string(), "num_requests_running".to_string()),
            ("model".to_string(), "llama".to_string()),
        ]);
        ts.create("ts:prom:num_requests_running:abcd1234", &labels, 1_000)
            .await?;
        // idempotent
        ts.create("ts:prom:num_requests_running:abcd1234", &labels, 1_000)
            .await?;

        let written = ts
            .add_batch(&[
                Sample {
                    key: "ts:prom:num_requests_running:abcd1234".into(),
                    timestamp_ms: 100,
                    value: 1.0,
                },
                Sample {
                    key: "ts:prom:num_requests_running:abcd1234".into(),
                    timestamp_ms: 100,
                    value: 2.0,
                },
                Sample {
                    key: "ts:prom:num_requests_running:abcd1234".into(),
                    timestamp_ms: 200,
                    value: 5.0,
                },
            ])
            .await?;
        assert_eq!(written, 3);

        let points = ts
            .range("ts:prom:num_requests_running:abcd1234", 0, 1_000, None)
            .await?;
        // duplicate policy LAST
        assert_eq!(points, vec![(100, 2.0), (200, 5.0)]);

        assert_eq!(
            ts.keys("ts:prom:num_requests_running:").await?,
            vec!["ts:prom:num_requests_running:abcd1234"]
        );
        assert!(ts.keys("ts:prom:other:").await?.is_empty());
        assert_eq!(
            ts.labels("ts:prom:num_requests_running:abcd1234").await?,
            labels
        );

        // retention drops points older than newest - retention
        ts.add_batch(&[Sample {
            key: "ts:prom:num_requests_running:abcd1234".into(),
            timestamp_ms: 1_150,
            value: 9.0,
        }])
        .await?;
        let points = ts
            .range("ts:prom:num_requests_running:abcd1234", 0, 2_000, None)
            .await?;
        assert_eq!(points, vec![(200, 5.0), (1_150, 9.0)]);
        Ok(())
    }
}
