// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        Method,
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderName},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::RouteDoc;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::RecordFilter;
use crate::llm::{self, Chat, ChatBody, Completion, CompletionBody, LlmRequest, LlmRoute};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct NimParams {
    nim_id: String,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    request_type: Option<String>,
    nim_id: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
}

pub fn llm_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let base = path.unwrap_or_else(|| "/api/llm".to_string());
    let inference = format!("{base}/inference");
    let completion = format!("{base}/completion");
    let record = format!("{base}/inference/{{request_id}}");
    let requests = format!("{base}/requests");
    let stats = format!("{base}/requests/stats");

    let docs = vec![
        RouteDoc::new(Method::POST, &inference),
        RouteDoc::new(Method::POST, &completion),
        RouteDoc::new(Method::GET, &record),
        RouteDoc::new(Method::DELETE, &record),
        RouteDoc::new(Method::GET, &requests),
        RouteDoc::new(Method::GET, &stats),
    ];
    let router = Router::new()
        .route(&inference, post(llm_handler::<ChatBody, Chat>))
        .route(&completion, post(llm_handler::<CompletionBody, Completion>))
        .route(&record, get(get_request).delete(delete_request))
        .route(&requests, get(list_requests))
        .route(&stats, get(request_stats))
        .with_state(state);
    (docs, router)
}

/// Chat and completion share everything but the body and the NIM route
async fn llm_handler<B, R>(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NimParams>,
    Json(request): Json<LlmRequest<B, R>>,
) -> GatewayResult<Response>
where
    B: Serialize + DeserializeOwned + Send + 'static,
    R: LlmRoute,
{
    let nim_id = params.nim_id;
    let nim = state
        .nims()
        .get(&nim_id)
        .await?
        .ok_or_else(|| GatewayError::not_found(format!("NIM {nim_id} not found")))?;
    request.validate()?;

    let url = format!("{}{}", nim.base_url(), R::PATH);
    let payload = request.upstream_payload();
    let mut record = request.new_record(&nim_id);
    state.ledger().create(&record).await?;
    tracing::info!(
        %nim_id,
        request_id = %record.request_id,
        model = %request.model,
        stream = request.is_stream(),
        %url,
        "created LLM request"
    );

    let mut guard = state
        .metrics_clone()
        .create_inflight_guard(&nim_id, R::METRICS_ENDPOINT, request.is_stream());

    if request.is_stream() {
        let stream = llm::spawn_relay(
            state.client().clone(),
            state.ledger().clone(),
            url,
            payload,
            record,
            guard,
        );
        let headers = [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ];
        return Ok((headers, Body::from_stream(stream)).into_response());
    }

    let output = llm::complete(state.client(), state.ledger(), url, &payload, &mut record).await?;
    guard.mark_ok();
    Ok(Json(output).into_response())
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    let record = state.ledger().get(&request_id).await?;
    Ok(Json(record.to_json()))
}

async fn delete_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    if !state.ledger().delete(&request_id).await? {
        return Err(GatewayError::not_found("Inference request not found"));
    }
    tracing::info!(%request_id, "deleted inference request");
    Ok(Json(json!({
        "message": "Inference request deleted successfully",
        "request_id": request_id,
    })))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> GatewayResult<Json<Value>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let filter = RecordFilter {
        kind: params.kind.clone(),
        request_type: params.request_type.clone(),
        status: params.status.clone(),
        nim_ids: params.nim_id.clone().into_iter().collect(),
        search: None,
    };
    let page = state.ledger().list(&filter, 0, limit).await?;
    let requests: Vec<Value> = page.records.iter().map(|r| r.to_json()).collect();
    Ok(Json(json!({
        "count": requests.len(),
        "requests": requests,
        "total": page.total,
        "filters": {
            "request_type": params.request_type,
            "nim_id": params.nim_id,
            "status": params.status,
            "type": params.kind,
            "limit": limit,
        },
    })))
}

async fn request_stats(State(state): State<Arc<AppState>>) -> GatewayResult<Json<Value>> {
    let stats = state.ledger().stats().await?;
    Ok(Json(json!(stats)))
}
