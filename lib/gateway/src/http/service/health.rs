// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Liveness of the gateway itself and a readiness proxy to the first LLM NIM.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, http::Method, routing::get};
use serde_json::{Value, json};

use super::RouteDoc;
use crate::error::{GatewayError, GatewayResult};
use crate::nim_type::NimType;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "nvidia-nim-kit";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn health_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let health_path = path.unwrap_or_else(|| "/api/health".to_string());
    let docs = vec![
        RouteDoc::new(Method::GET, "/"),
        RouteDoc::new(Method::GET, &health_path),
        RouteDoc::new(Method::GET, "/v1/health/ready"),
        RouteDoc::new(Method::GET, "/v1/health/live"),
    ];

    let router = Router::new()
        .route("/", get(root_handler))
        .route(&health_path, get(health_handler))
        .route("/v1/health/ready", get(ready_handler))
        .route("/v1/health/live", get(live_handler))
        .with_state(state);

    (docs, router)
}

async fn root_handler() -> Json<Value> {
    Json(json!({"message": "Welcome to NVIDIA NIM Kit API"}))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": SERVICE_NAME,
    }))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    probe(&state, Probe::Ready).await.map(Json)
}

async fn live_handler(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    probe(&state, Probe::Live).await.map(Json)
}

#[derive(Debug, Clone, Copy, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
enum Probe {
    Ready,
    Live,
}

/// Asks the first configured LLM NIM for its health. Every failure is a 503.
async fn probe(state: &AppState, probe: Probe) -> GatewayResult<Value> {
    let kind = probe.as_ref();
    let unavailable = || GatewayError::Unavailable("External LLM service unavailable".to_string());

    let nim = match state.nims().first_of_type(&NimType::Llm).await {
        Ok(Some(nim)) => nim,
        Ok(None) => {
            tracing::error!(probe = kind, "no LLM NIM configured");
            return Err(unavailable());
        }
        Err(err) => {
            tracing::error!(probe = kind, %err, "failed to look up LLM NIM");
            return Err(unavailable());
        }
    };

    let url = format!("{}/v1/health/{kind}", nim.base_url());
    let response = match state.client().get(&url).timeout(PROBE_TIMEOUT).send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            tracing::error!(%url, "timeout checking external LLM service");
            return Err(GatewayError::Unavailable(
                "External LLM service timeout".to_string(),
            ));
        }
        Err(err) => {
            tracing::error!(%url, %err, "error checking external LLM service");
            return Err(unavailable());
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::error!(%url, status = status.as_u16(), "external LLM service returned error");
        return Err(GatewayError::Unavailable(format!(
            "External LLM service error: {}",
            status.as_u16()
        )));
    }

    let body = response.bytes().await.map_err(|err| {
        tracing::error!(%url, %err, "failed to read external LLM health response");
        unavailable()
    })?;
    let external_response = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|err| {
            tracing::error!(%url, %err, "external LLM health response is not JSON");
            unavailable()
        })?
    };

    Ok(json!({
        "status": kind,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
        "external_service": "healthy",
        "external_response": external_response,
    }))
}
