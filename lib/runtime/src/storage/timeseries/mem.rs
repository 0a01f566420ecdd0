// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Aggregation, Sample, TimeSeriesStore, aggregate};
use crate::storage::key_value_store::StoreError;

#[derive(Default)]
struct Series {
    labels: BTreeMap<String, String>,
    /// 0 keeps everything
    retention_ms: u64,
    points: BTreeMap<i64, f64>,
}

impl Series {
    fn trim(&mut self) {
        if self.retention_ms == 0 {
            return;
        }
        if let Some((&newest, _)) = self.points.last_key_value() {
            let cutoff = newest.saturating_sub(self.retention_ms as i64);
            self.points = self.points.split_off(&cutoff);
        }
    }
}

/// Process-local time series for tests and for the memory and file backends
#[derive(Default)]
pub struct MemoryTimeSeries {
    series: Mutex<BTreeMap<String, Series>>,
}

impl MemoryTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeries {
    async fn create(
        &self,
        key: &str,
        labels: &BTreeMap<String, String>,
        retention_ms: u64,
    ) -> Result<(), StoreError> {
        let mut series = self.series.lock();
        series.entry(key.to_string()).or_insert_with(|| Series {
            labels: labels.clone(),
            retention_ms,
            points: BTreeMap::new(),
        });
        Ok(())
    }

    async fn add_batch(&self, samples: &[Sample]) -> Result<usize, StoreError> {
        let mut series = self.series.lock();
        for sample in samples {
            // TS.ADD auto-creates missing series
            let s = series.entry(sample.key.clone()).or_default();
            s.points.insert(sample.timestamp_ms, sample.value);
            s.trim();
        }
        Ok(samples.len())
    }

    async fn range(
        &self,
        key: &str,
        from_ms: i64,
        to_ms: i64,
        aggregation: Option<Aggregation>,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        let series = self.series.lock();
        let Some(s) = series.get(key) else {
            return Err(StoreError::MissingKey(key.to_string()));
        };
        if from_ms > to_ms {
            return Ok(vec![]);
        }
        let points: Vec<(i64, f64)> = s
            .points
            .range(from_ms..=to_ms)
            .map(|(ts, v)| (*ts, *v))
            .collect();
        Ok(match aggregation {
            Some(aggregation) => aggregate(&points, aggregation),
            None => points,
        })
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .series
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn labels(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self
            .series
            .lock()
            .get(key)
            .map(|s| s.labels.clone())
            .unwrap_or_default())
    }
}
