// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scrapes the Prometheus endpoint of an LLM NIM into the time-series store,
//! and answers range queries over what was ingested.
//!
//! Every distinct label set of a metric is its own series, keyed
//! `ts:prom:{metric}:{hash8}` where `hash8` is the first 8 hex digits of the
//! SHA-1 of the sorted `[name, value]` pairs, encoded exactly as Python's
//! `json.dumps` writes them. Series created by the earlier Python ingester
//! keep their keys.

pub mod exposition;

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nimkit_runtime::storage::key_value_store::StoreError;
use nimkit_runtime::storage::timeseries::{Aggregation, AggregationKind, Sample, TimeSeriesStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{GatewayError, GatewayResult};
use crate::nim_type::NimType;
use crate::nims::NimStore;

pub const KEY_PREFIX: &str = "ts:prom:";
const SCRAPE_PATH: &str = "/v1/metrics";
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_WINDOW_MS: i64 = 60 * 60 * 1000;
pub const DEFAULT_SERIES_LIMIT: usize = 50;

/// Outcome of one scrape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Metric families in the scraped text
    pub parsed: usize,
    pub written: usize,
    pub errors: usize,
}

impl IngestReport {
    fn failed() -> Self {
        IngestReport {
            parsed: 0,
            written: 0,
            errors: 1,
        }
    }
}

/// Series key and labels for one sample
pub fn series_key(metric: &str, labels: &BTreeMap<String, String>) -> (String, BTreeMap<String, String>) {
    let encoded = python_json_pairs(labels);
    let digest = hex::encode(Sha1::digest(encoded.as_bytes()));
    let key = format!("{KEY_PREFIX}{metric}:{}", &digest[..8]);

    let mut series_labels = labels.clone();
    series_labels.insert("metric".to_string(), metric.to_string());
    (key, series_labels)
}

/// `[["k", "v"], ...]` with `", "` separators and ASCII-only escapes
fn python_json_pairs(labels: &BTreeMap<String, String>) -> String {
    let pairs: Vec<String> = labels
        .iter()
        .map(|(name, value)| format!("[{}, {}]", python_json_str(name), python_json_str(value)))
        .collect();
    format!("[{}]", pairs.join(", "))
}

fn python_json_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
    out
}

/// The metric name inside a series key
pub fn metric_of_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(KEY_PREFIX)?;
    rest.rsplit_once(':').map(|(metric, _hash)| metric)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoints {
    pub key: String,
    pub labels: BTreeMap<String, String>,
    pub points: Vec<(i64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesInfo {
    pub key: String,
    pub labels: BTreeMap<String, String>,
}

/// A validated range query
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsQuery {
    pub metric: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub labels: Vec<(String, String)>,
    pub aggregation: Option<Aggregation>,
    pub limit: usize,
}

/// Raw parameters of `GET /api/metrics/query`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub metric: String,
    pub start: Option<String>,
    pub end: Option<String>,
    /// `k=v,k2=v2`
    pub labels: Option<String>,
    pub agg: Option<String>,
    pub bucket_ms: Option<u64>,
    pub limit: Option<usize>,
}

impl MetricsQuery {
    /// Validates raw parameters. The window defaults to the hour before `now`.
    pub fn parse(params: QueryParams, now: DateTime<Utc>) -> GatewayResult<MetricsQuery> {
        let now_ms = now.timestamp_millis();
        let end_ms = params
            .end
            .as_deref()
            .map(parse_time)
            .transpose()?
            .unwrap_or(now_ms);
        let start_ms = params
            .start
            .as_deref()
            .map(parse_time)
            .transpose()?
            .unwrap_or(end_ms.saturating_sub(DEFAULT_WINDOW_MS));
        let labels = params
            .labels
            .as_deref()
            .map(parse_label_filters)
            .transpose()?
            .unwrap_or_default();

        let agg = params.agg.as_deref().filter(|a| !a.is_empty());
        let aggregation = match (agg, params.bucket_ms) {
            (None, _) => None,
            (Some(_), None) => {
                return Err(GatewayError::validation(
                    "bucket_ms is required when agg is specified",
                ));
            }
            (Some(kind), Some(bucket_ms)) => {
                let kind: AggregationKind = kind
                    .parse()
                    .map_err(|_| GatewayError::validation(format!("Invalid aggregation: {kind}")))?;
                Some(Aggregation { kind, bucket_ms })
            }
        };

        Ok(MetricsQuery {
            metric: params.metric,
            start_ms,
            end_ms,
            labels,
            aggregation,
            limit: params.limit.unwrap_or(DEFAULT_SERIES_LIMIT),
        })
    }
}

/// Milliseconds since the epoch, or an RFC 3339 timestamp
pub fn parse_time(raw: &str) -> GatewayResult<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| GatewayError::validation(format!("Invalid time format: {raw}")))
}

/// `k=v,k2=v2`
pub fn parse_label_filters(raw: &str) -> GatewayResult<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| GatewayError::validation(format!("Invalid label format: {pair}")))
        })
        .collect()
}

pub struct MetricsIngester {
    series: Arc<dyn TimeSeriesStore>,
    nims: NimStore,
    client: reqwest::Client,
    retention_ms: u64,
    fallback_url: String,
    created: Mutex<HashSet<String>>,
}

impl MetricsIngester {
    pub fn new(
        series: Arc<dyn TimeSeriesStore>,
        nims: NimStore,
        client: reqwest::Client,
        retention_ms: u64,
        fallback_url: impl Into<String>,
    ) -> Self {
        MetricsIngester {
            series,
            nims,
            client,
            retention_ms,
            fallback_url: fallback_url.into(),
            created: Mutex::new(HashSet::new()),
        }
    }

    /// `/v1/metrics` on the first configured LLM NIM, or on the fallback
    pub async fn scrape_url(&self) -> Result<String, StoreError> {
        let base = match self.nims.first_of_type(&NimType::Llm).await? {
            Some(nim) => nim.base_url(),
            None => {
                tracing::debug!(fallback = %self.fallback_url, "no LLM NIM configured, scraping fallback");
                self.fallback_url.trim_end_matches('/').to_string()
            }
        };
        Ok(format!("{base}{SCRAPE_PATH}"))
    }

    async fn fetch(&self) -> anyhow::Result<String> {
        let url = self.scrape_url().await?;
        tracing::debug!(%url, "scraping metrics");
        let text = self
            .client
            .get(&url)
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    /// One scrape. Failures are logged and reflected in the report, never retried.
    pub async fn ingest(&self) -> IngestReport {
        let text = match self.fetch().await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(%err, "failed to fetch metrics");
                return IngestReport::failed();
            }
        };
        self.ingest_text(&text, Utc::now().timestamp_millis()).await
    }

    /// Writes an already scraped exposition. Samples without a timestamp get `now_ms`.
    pub async fn ingest_text(&self, text: &str, now_ms: i64) -> IngestReport {
        let parsed = match exposition::parse(text) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(%err, "failed to parse metrics");
                return IngestReport::failed();
            }
        };

        let mut report = IngestReport {
            parsed: parsed.families.len(),
            ..Default::default()
        };
        let mut batch = Vec::with_capacity(parsed.samples.len());
        for sample in &parsed.samples {
            let (key, labels) = series_key(&sample.name, &sample.labels);
            if let Err(err) = self.ensure_series(&key, &labels).await {
                tracing::error!(%key, %err, "failed to create time series");
                report.errors += 1;
                continue;
            }
            batch.push(Sample {
                key,
                timestamp_ms: sample.timestamp_ms.unwrap_or(now_ms),
                value: sample.value,
            });
        }

        match self.series.add_batch(&batch).await {
            Ok(written) => {
                report.written = written;
                tracing::info!(written, errors = report.errors, "processed metrics");
            }
            Err(err) => {
                tracing::error!(%err, "time series pipeline failed");
                report.errors += batch.len();
            }
        }
        report
    }

    async fn ensure_series(
        &self,
        key: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        if self.created.lock().contains(key) {
            return Ok(());
        }
        self.series.create(key, labels, self.retention_ms).await?;
        self.created.lock().insert(key.to_string());
        tracing::debug!(%key, "created time series");
        Ok(())
    }

    /// Series of `query.metric` whose labels match every filter, with their points
    pub async fn query(&self, query: &MetricsQuery) -> Result<Vec<SeriesPoints>, StoreError> {
        let keys = self.series_keys(Some(&query.metric)).await?;
        let mut series = Vec::new();
        for key in keys {
            if series.len() >= query.limit {
                break;
            }
            let labels = self.series.labels(&key).await?;
            let matches = query
                .labels
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v));
            if !matches {
                continue;
            }
            let points = match self
                .series
                .range(&key, query.start_ms, query.end_ms, query.aggregation)
                .await
            {
                Ok(points) => points,
                Err(err) => {
                    tracing::warn!(%key, %err, "failed to query series");
                    continue;
                }
            };
            series.push(SeriesPoints {
                key,
                labels,
                points,
            });
        }
        Ok(series)
    }

    /// Ingested series, optionally narrowed to one metric
    pub async fn keys(&self, metric: Option<&str>, limit: usize) -> Result<Vec<SeriesInfo>, StoreError> {
        let keys = self.series_keys(metric).await?;
        let mut infos = Vec::with_capacity(keys.len().min(limit));
        for key in keys.into_iter().take(limit) {
            let labels = self.series.labels(&key).await?;
            infos.push(SeriesInfo { key, labels });
        }
        Ok(infos)
    }

    async fn series_keys(&self, metric: Option<&str>) -> Result<Vec<String>, StoreError> {
        let metric = metric.filter(|m| !m.is_empty());
        let prefix = match metric {
            Some(metric) => format!("{KEY_PREFIX}{metric}:"),
            None => KEY_PREFIX.to_string(),
        };
        let keys = self.series.keys(&prefix).await?;
        // `foo` must not pick up the series of `foo:bar`
        Ok(keys
            .into_iter()
            .filter(|key| match metric {
                Some(metric) => metric_of_key(key) == Some(metric),
                None => metric_of_key(key).is_some(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimkit_runtime::storage::key_value_store::Manager;
    use rstest::rstest;

    fn ingester(manager: &Manager) -> MetricsIngester {
        MetricsIngester::new(
            manager.time_series(),
            NimStore::new(manager.clone()),
            reqwest::Client::new(),
            604_800_000,
            "http://localhost:8000",
        )
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_series_key_is_stable_across_label_order() {
        let mut a = BTreeMap::new();
        a.insert("model".to_string(), "llama".to_string());
        a.insert("le".to_string(), "0.5".to_string());
        let mut b = BTreeMap::new();
        b.insert("le".to_string(), "0.5".to_string());
        b.insert("model".to_string(), "llama".to_string());

        let (key_a, labels_a) = series_key("ttft_bucket", &a);
        let (key_b, _) = series_key("ttft_bucket", &b);
        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with("ts:prom:ttft_bucket:"));
        assert_eq!(key_a.len(), "ts:prom:ttft_bucket:".len() + 8);
        assert_eq!(labels_a["metric"], "ttft_bucket");

        let (other, _) = series_key("ttft_bucket", &labels(&[("le", "1.0")]));
        assert_ne!(key_a, other);
    }

    #[rstest]
    #[case(&[("model", "llama"), ("le", "0.5")], r#"[["le", "0.5"], ["model", "llama"]]"#, "49cd9c16")]
    #[case(&[], "[]", "97d170e1")]
    #[case(
        &[("path", "/v1/chat"), ("note", "caf\u{e9} \"x\"\n\u{1F600}\u{7f}")],
        r#"[["note", "caf\u00e9 \"x\"\n\ud83d\ude00\u007f"], ["path", "/v1/chat"]]"#,
        "100415b7"
    )]
    fn test_series_key_matches_python_ingester(
        #[case] pairs: &[(&str, &str)],
        #[case] encoded: &str,
        #[case] hash8: &str,
    ) {
        let labels = labels(pairs);
        assert_eq!(python_json_pairs(&labels), encoded);
        let (key, _) = series_key("m", &labels);
        assert_eq!(key, format!("ts:prom:m:{hash8}"));
    }

    #[rstest]
    #[case("ts:prom:gpu_cache_usage_perc:0a1b2c3d", Some("gpu_cache_usage_perc"))]
    #[case("ts:prom:ns:metric:deadbeef", Some("ns:metric"))]
    #[case("ts:prom:nohash", None)]
    #[case("other:key", None)]
    fn test_metric_of_key(#[case] key: &str, #[case] expected: Option<&str>) {
        assert_eq!(metric_of_key(key), expected);
    }

    #[test]
    fn test_query_parsing() -> anyhow::Result<()> {
        let now = DateTime::parse_from_rfc3339("2025-01-01T01:00:00Z")?.with_timezone(&Utc);
        let params = QueryParams {
            metric: "m".into(),
            labels: Some("a=1, b=2".into()),
            ..Default::default()
        };
        let query = MetricsQuery::parse(params, now)?;
        assert_eq!(query.end_ms, now.timestamp_millis());
        assert_eq!(query.start_ms, query.end_ms - 3_600_000);
        assert_eq!(query.labels, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
        assert_eq!(query.limit, 50);

        let params = QueryParams {
            metric: "m".into(),
            start: Some("2025-01-01T00:00:00Z".into()),
            end: Some("1735693200000".into()),
            agg: Some("avg".into()),
            bucket_ms: Some(60_000),
            limit: Some(5),
            ..Default::default()
        };
        let query = MetricsQuery::parse(params, now)?;
        assert_eq!(query.start_ms, 1_735_689_600_000);
        assert_eq!(query.end_ms, 1_735_693_200_000);
        assert_eq!(query.aggregation.unwrap().kind, AggregationKind::Avg);
        assert_eq!(query.limit, 5);
        Ok(())
    }

    #[test]
    fn test_window_saturates_at_earliest_time() -> anyhow::Result<()> {
        let params = QueryParams {
            metric: "m".into(),
            end: Some(i64::MIN.to_string()),
            ..Default::default()
        };
        let query = MetricsQuery::parse(params, Utc::now())?;
        assert_eq!(query.end_ms, i64::MIN);
        assert_eq!(query.start_ms, i64::MIN);
        Ok(())
    }

    #[rstest]
    #[case(Some("yesterday"), None, None, "Invalid time format: yesterday")]
    #[case(None, Some("a"), None, "Invalid label format: a")]
    #[case(None, None, Some("avg"), "bucket_ms is required when agg is specified")]
    fn test_query_errors(
        #[case] start: Option<&str>,
        #[case] labels: Option<&str>,
        #[case] agg: Option<&str>,
        #[case] detail: &str,
    ) {
        let params = QueryParams {
            metric: "m".into(),
            start: start.map(String::from),
            labels: labels.map(String::from),
            agg: agg.map(String::from),
            ..Default::default()
        };
        let err = MetricsQuery::parse(params, Utc::now()).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.to_string(), detail);
    }

    #[tokio::test]
    async fn test_ingest_and_query() -> anyhow::Result<()> {
        let manager = Manager::memory();
        let ingester = ingester(&manager);
        let text = "\
# TYPE num_requests_running gauge
num_requests_running{model_name=\"a\"} 1
num_requests_running{model_name=\"b\"} 3
# TYPE num_requests_waiting gauge
num_requests_waiting 0
";
        let report = ingester.ingest_text(text, 1_000).await;
        assert_eq!(report, IngestReport { parsed: 2, written: 3, errors: 0 });
        ingester.ingest_text(text, 2_000).await;

        let query = MetricsQuery {
            metric: "num_requests_running".into(),
            start_ms: 0,
            end_ms: 10_000,
            labels: vec![("model_name".into(), "b".into())],
            aggregation: None,
            limit: 50,
        };
        let series = ingester.query(&query).await?;
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].labels["metric"], "num_requests_running");
        assert_eq!(series[0].points, vec![(1_000, 3.0), (2_000, 3.0)]);

        assert_eq!(ingester.keys(None, 50).await?.len(), 3);
        assert_eq!(ingester.keys(Some("num_requests_waiting"), 50).await?.len(), 1);
        assert_eq!(ingester.keys(None, 2).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_unparseable_text_is_one_error() -> anyhow::Result<()> {
        let manager = Manager::memory();
        let report = ingester(&manager).ingest_text("bad{x=1} 2", 0).await;
        assert_eq!(report, IngestReport { parsed: 0, written: 0, errors: 1 });
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_one_error() -> anyhow::Result<()> {
        let manager = Manager::memory();
        let ingester = MetricsIngester::new(
            manager.time_series(),
            NimStore::new(manager.clone()),
            reqwest::Client::new(),
            1_000,
            "http://127.0.0.1:1",
        );
        assert_eq!(ingester.scrape_url().await?, "http://127.0.0.1:1/v1/metrics");
        assert_eq!(ingester.ingest().await, IngestReport { parsed: 0, written: 0, errors: 1 });
        Ok(())
    }
}
