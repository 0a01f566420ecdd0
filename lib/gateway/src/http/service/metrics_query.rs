// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Read side of the ingested NIM metrics, plus a manual scrape trigger.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::Method,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::RouteDoc;
use crate::error::GatewayResult;
use crate::metrics_ingest::{DEFAULT_SERIES_LIMIT, IngestReport, MetricsQuery, QueryParams};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct KeysParams {
    metric: Option<String>,
    limit: Option<usize>,
}

pub fn metrics_query_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let base = path.unwrap_or_else(|| "/api/metrics".to_string());
    let query_path = format!("{base}/query");
    let keys_path = format!("{base}/keys");
    let ingest_path = format!("{base}/ingest");
    let docs = vec![
        RouteDoc::new(Method::GET, &query_path),
        RouteDoc::new(Method::GET, &keys_path),
        RouteDoc::new(Method::POST, &ingest_path),
    ];
    let router = Router::new()
        .route(&query_path, get(query_handler))
        .route(&keys_path, get(keys_handler))
        .route(&ingest_path, post(ingest_handler))
        .with_state(state);
    (docs, router)
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> GatewayResult<Json<Value>> {
    let query = MetricsQuery::parse(params, chrono::Utc::now())?;
    let series = state.ingester().query(&query).await?;
    Ok(Json(json!({
        "metric": query.metric,
        "count": series.len(),
        "series": series,
    })))
}

async fn keys_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KeysParams>,
) -> GatewayResult<Json<Value>> {
    let metric = params.metric.as_deref().filter(|m| !m.is_empty());
    let limit = params.limit.unwrap_or(DEFAULT_SERIES_LIMIT);
    let keys = state.ingester().keys(metric, limit).await?;
    Ok(Json(json!({
        "count": keys.len(),
        "keys": keys,
    })))
}

async fn ingest_handler(State(state): State<Arc<AppState>>) -> Json<IngestReport> {
    let report = state.ingester().ingest().await;
    tracing::info!(
        parsed = report.parsed,
        written = report.written,
        errors = report.errors,
        "manual metrics ingest"
    );
    Json(report)
}
