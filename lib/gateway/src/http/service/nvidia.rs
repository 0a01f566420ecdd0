// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::Method,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::RouteDoc;
use crate::api_keys::{KeySource, preview};
use crate::error::GatewayResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct SetKeyRequest {
    #[serde(default)]
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    #[serde(default)]
    enabled: bool,
}

pub fn nvidia_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let base = path.unwrap_or_else(|| "/api/nvidia".to_string());
    let key_path = format!("{base}/api-key");
    let toggle_path = format!("{base}/toggle");
    let docs = vec![
        RouteDoc::new(Method::GET, &key_path),
        RouteDoc::new(Method::POST, &key_path),
        RouteDoc::new(Method::DELETE, &key_path),
        RouteDoc::new(Method::GET, &toggle_path),
        RouteDoc::new(Method::POST, &toggle_path),
    ];
    let router = Router::new()
        .route(
            &key_path,
            get(get_key_status).post(set_key).delete(delete_key),
        )
        .route(&toggle_path, get(get_toggle).post(set_toggle))
        .with_state(state);
    (docs, router)
}

async fn get_key_status(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    let (key, source) = state.api_keys().resolve().await?;
    Ok(Json(json!({
        "preview": preview(key.as_deref()),
        "has_key": key.is_some(),
        "source": source,
        "status": "success",
    })))
}

async fn set_key(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetKeyRequest>,
) -> GatewayResult<Json<Value>> {
    let preview = state.api_keys().set(&request.api_key).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "NVIDIA API key set successfully",
        "preview": preview,
    })))
}

async fn delete_key(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    let existed = state.api_keys().delete().await?;
    tracing::info!(existed, "deleted NVIDIA API key");
    Ok(Json(json!({
        "status": "success",
        "message": "NVIDIA API key deleted successfully",
    })))
}

async fn get_toggle(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    let (_, source) = state.api_keys().resolve().await?;
    if source == KeySource::None {
        return Ok(Json(json!({
            "enabled": false,
            "can_enable": false,
            "reason": "No NVIDIA API key configured",
        })));
    }
    let enabled = state.api_keys().toggle().await?;
    Ok(Json(json!({
        "enabled": enabled,
        "can_enable": true,
        "reason": null,
    })))
}

async fn set_toggle(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToggleRequest>,
) -> GatewayResult<Json<Value>> {
    state.api_keys().set_toggle(request.enabled).await?;
    tracing::info!(enabled = request.enabled, "set NVIDIA API toggle");
    Ok(Json(json!({
        "enabled": request.enabled,
        "can_enable": true,
        "status": "success",
    })))
}
