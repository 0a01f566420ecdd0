// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

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
use crate::state::AppState;

pub fn catalog_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/api/catalog".to_string());
    let entry_path = format!("{path}/{{*nim_id}}");
    let docs = vec![
        RouteDoc::new(Method::GET, &path),
        RouteDoc::new(Method::GET, &entry_path),
    ];
    let router = Router::new()
        .route(&path, get(list_catalog))
        .route(&entry_path, get(get_entry))
        .with_state(state);
    (docs, router)
}

async fn list_catalog(State(state): State<Arc<AppState>>) -> Json<Value> {
    let catalog = state.catalog();
    let nims: Vec<Value> = catalog.entries().iter().map(|entry| entry.to_json()).collect();
    Json(json!({
        "nims": nims,
        "count": catalog.len(),
        "status": "success",
    }))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(nim_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    state
        .catalog()
        .get(&nim_id)
        .map(|entry| Json(entry.to_json()))
        .ok_or_else(|| GatewayError::not_found(format!("NIM {nim_id} not found in catalog")))
}
