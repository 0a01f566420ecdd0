// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};
use std::{sync::Arc, time::Instant};

pub use prometheus::Registry;

use super::RouteDoc;

const METRICS_PREFIX: &str = "nimkit_gateway";

/// Gateway self-metrics, exposed on `/metrics`
pub struct Metrics {
    request_counter: IntCounterVec,
    inflight_gauge: IntGaugeVec,
    request_duration: HistogramVec,
}

/// RAII object for the inflight gauge and request counters
/// If this object is dropped without calling `mark_ok`, the request is counted
/// with `status="error"`, otherwise with `status="success"`.
pub struct InflightGuard {
    metrics: Arc<Metrics>,
    nim_id: String,
    endpoint: Endpoint,
    request_type: RequestType,
    status: Status,
    timer: Instant,
}

/// The inference surface a request came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Endpoint {
    /// `/v0/nims/{publisher}/{model}`
    Inference,
    Asr,
    SpeechEnhancement,
    ChatCompletions,
    Completions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RequestType {
    Unary,
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

impl Metrics {
    /// Creates the collectors. They still need to be [`Metrics::register`]ed.
    ///
    /// - `nimkit_gateway_requests_total` by nim_id, endpoint, request_type and status
    /// - `nimkit_gateway_inflight_requests` by nim_id
    /// - `nimkit_gateway_request_duration_seconds` by nim_id
    pub fn new() -> Result<Self, prometheus::Error> {
        let name = |suffix: &str| format!("{METRICS_PREFIX}_{suffix}");

        let request_counter = IntCounterVec::new(
            Opts::new(name("requests_total"), "Total number of inference requests processed"),
            &["nim_id", "endpoint", "request_type", "status"],
        )?;

        let inflight_gauge = IntGaugeVec::new(
            Opts::new(name("inflight_requests"), "Number of inflight inference requests"),
            &["nim_id"],
        )?;

        let buckets = vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                name("request_duration_seconds"),
                "Duration of inference requests",
            )
            .buckets(buckets),
            &["nim_id"],
        )?;

        Ok(Metrics {
            request_counter,
            inflight_gauge,
            request_duration,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.request_counter.clone()))?;
        registry.register(Box::new(self.inflight_gauge.clone()))?;
        registry.register(Box::new(self.request_duration.clone()))?;
        Ok(())
    }

    pub fn get_request_counter(
        &self,
        nim_id: &str,
        endpoint: Endpoint,
        request_type: RequestType,
        status: Status,
    ) -> u64 {
        self.request_counter
            .with_label_values(&[
                nim_id,
                endpoint.as_ref(),
                request_type.as_ref(),
                status.as_ref(),
            ])
            .get()
    }

    pub fn get_inflight_count(&self, nim_id: &str) -> i64 {
        self.inflight_gauge.with_label_values(&[nim_id]).get()
    }

    /// Starts tracking one request. The returned guard records the outcome when dropped.
    pub fn create_inflight_guard(
        self: Arc<Self>,
        nim_id: &str,
        endpoint: Endpoint,
        streaming: bool,
    ) -> InflightGuard {
        let request_type = if streaming {
            RequestType::Stream
        } else {
            RequestType::Unary
        };
        InflightGuard::new(self, nim_id.to_string(), endpoint, request_type)
    }
}

impl InflightGuard {
    fn new(
        metrics: Arc<Metrics>,
        nim_id: String,
        endpoint: Endpoint,
        request_type: RequestType,
    ) -> Self {
        metrics.inflight_gauge.with_label_values(&[&nim_id]).inc();
        InflightGuard {
            metrics,
            nim_id,
            endpoint,
            request_type,
            status: Status::Error,
            timer: Instant::now(),
        }
    }

    pub fn mark_ok(&mut self) {
        self.status = Status::Success;
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let duration = self.timer.elapsed().as_secs_f64();
        self.metrics
            .inflight_gauge
            .with_label_values(&[&self.nim_id])
            .dec();
        self.metrics
            .request_counter
            .with_label_values(&[
                self.nim_id.as_str(),
                self.endpoint.as_ref(),
                self.request_type.as_ref(),
                self.status.as_ref(),
            ])
            .inc();
        self.metrics
            .request_duration
            .with_label_values(&[&self.nim_id])
            .observe(duration);
    }
}

/// Create a router exposing `registry` in the Prometheus text format
pub fn router(registry: Registry, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let registry = Arc::new(registry);
    let path = path.unwrap_or_else(|| "/metrics".to_string());
    let doc = RouteDoc::new(axum::http::Method::GET, &path);
    let route = Router::new()
        .route(&path, get(handler_metrics))
        .with_state(registry);
    (vec![doc], route)
}

async fn handler_metrics(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match String::from_utf8(buffer) {
        Ok(metrics) => (StatusCode::OK, metrics).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts_errors_unless_marked_ok() -> anyhow::Result<()> {
        let metrics = Arc::new(Metrics::new()?);
        let nim = "bfl/flux";

        {
            let _guard = metrics.clone().create_inflight_guard(nim, Endpoint::Inference, false);
            assert_eq!(metrics.get_inflight_count(nim), 1);
        }
        {
            let mut guard = metrics.clone().create_inflight_guard(nim, Endpoint::Inference, false);
            guard.mark_ok();
        }

        assert_eq!(metrics.get_inflight_count(nim), 0);
        let count = |status| {
            metrics.get_request_counter(nim, Endpoint::Inference, RequestType::Unary, status)
        };
        assert_eq!(count(Status::Error), 1);
        assert_eq!(count(Status::Success), 1);
        Ok(())
    }

    #[test]
    fn test_labels() {
        assert_eq!(Endpoint::SpeechEnhancement.as_ref(), "speech_enhancement");
        assert_eq!(Endpoint::ChatCompletions.as_ref(), "chat_completions");
        assert_eq!(RequestType::Stream.as_ref(), "stream");
    }

    #[test]
    fn test_register_twice_fails() -> anyhow::Result<()> {
        let registry = Registry::new();
        let metrics = Metrics::new()?;
        metrics.register(&registry)?;
        assert!(metrics.register(&registry).is_err());
        Ok(())
    }
}
