// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! CRUD over NIM routing records. Ids contain slashes, so the id is a
//! wildcard path segment.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::Method,
    routing::get,
};
use serde_json::{Value, json};

use super::RouteDoc;
use crate::error::{GatewayError, GatewayResult};
use crate::nims::{NimConfig, NimConfigRequest};
use crate::state::AppState;

pub fn nims_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/api/nims".to_string());
    let nim_path = format!("{path}/{{*nim_id}}");
    let mut docs = vec![RouteDoc::new(Method::GET, &path)];
    docs.extend(
        [Method::POST, Method::GET, Method::PUT, Method::DELETE]
            .into_iter()
            .map(|method| RouteDoc::new(method, &nim_path)),
    );

    let router = Router::new()
        .route(&path, get(list_nims))
        .route(
            &nim_path,
            get(get_nim).post(set_nim).put(update_nim).delete(delete_nim),
        )
        .with_state(state);
    (docs, router)
}

fn not_found(nim_id: &str) -> GatewayError {
    GatewayError::not_found(format!("NIM data not found for {nim_id}"))
}

fn validated(nim_id: &str, request: NimConfigRequest) -> GatewayResult<NimConfig> {
    request
        .into_config(nim_id)
        .map_err(|errors| GatewayError::validation(errors.to_string()))
}

/// The record with `status` and, when given, `message` added
fn view(config: &NimConfig, message: Option<String>) -> Value {
    let mut value = json!(config);
    value["status"] = json!("success");
    if let Some(message) = message {
        value["message"] = json!(message);
    }
    value
}

async fn list_nims(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    let nim_ids = state.nims().list_ids().await?;
    Ok(Json(json!({
        "count": nim_ids.len(),
        "nim_ids": nim_ids,
        "status": "success",
    })))
}

async fn set_nim(
    State(state): State<Arc<AppState>>,
    Path(nim_id): Path<String>,
    Json(request): Json<NimConfigRequest>,
) -> GatewayResult<Json<Value>> {
    let config = validated(&nim_id, request)?;
    state.nims().put(&config).await?;
    let message = format!("NIM data set successfully for {nim_id}");
    Ok(Json(view(&config, Some(message))))
}

async fn get_nim(
    State(state): State<Arc<AppState>>,
    Path(nim_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    match state.nims().get(&nim_id).await? {
        Some(config) => Ok(Json(view(&config, None))),
        None => Err(not_found(&nim_id)),
    }
}

async fn update_nim(
    State(state): State<Arc<AppState>>,
    Path(nim_id): Path<String>,
    Json(request): Json<NimConfigRequest>,
) -> GatewayResult<Json<Value>> {
    if state.nims().get(&nim_id).await?.is_none() {
        return Err(not_found(&nim_id));
    }
    let config = validated(&nim_id, request)?;
    state.nims().put(&config).await?;
    let message = format!("NIM data updated successfully for {nim_id}");
    Ok(Json(view(&config, Some(message))))
}

async fn delete_nim(
    State(state): State<Arc<AppState>>,
    Path(nim_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    if !state.nims().delete(&nim_id).await? {
        return Err(not_found(&nim_id));
    }
    tracing::info!(%nim_id, "deleted NIM config");
    Ok(Json(json!({
        "nim_id": nim_id,
        "status": "success",
        "message": format!("NIM data deleted successfully for {nim_id}"),
    })))
}
