// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Inference endpoints that go through the dispatcher: the generic JSON
//! endpoint and the two multipart audio uploads.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::Method,
    routing::post,
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::RouteDoc;
use super::metrics::Endpoint;
use crate::error::{GatewayError, GatewayResult};
use crate::handlers::{self, InferenceContext, ResolvedNim};
use crate::handlers::speech_enhancement::ModelType;
use crate::ledger::{InferenceRecord, RecordKind, RequestType};
use crate::nim_type::NimType;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InferenceParams {
    /// Route to the hosted endpoint instead of the local NIM
    pub use_nvidia_api: bool,
}

pub fn inference_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/v0/nims/{publisher}/{model}".to_string());
    let doc = RouteDoc::new(Method::POST, &path);
    let router = Router::new()
        .route(&path, post(inference_handler))
        .with_state(state);
    (vec![doc], router)
}

pub fn asr_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/v0/asr/{publisher}/{model}".to_string());
    let doc = RouteDoc::new(Method::POST, &path);
    let router = Router::new()
        .route(&path, post(asr_handler))
        .with_state(state);
    (vec![doc], router)
}

pub fn speech_enhancement_router(
    state: Arc<AppState>,
    path: Option<String>,
) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/v0/speech-enhancement/{publisher}/{model}".to_string());
    let doc = RouteDoc::new(Method::POST, &path);
    let router = Router::new()
        .route(&path, post(speech_enhancement_handler))
        .with_state(state);
    (vec![doc], router)
}

/// Record view returned by every dispatched endpoint
fn record_view(record: &InferenceRecord, nim: &ResolvedNim) -> Value {
    json!({
        "request_id": record.request_id,
        "nim_id": record.nim_id,
        "type": record.kind,
        "request_type": record.request_type,
        "model": record.model,
        "status": record.status,
        "date_created": record.date_created,
        "date_updated": record.date_updated,
        "input": record.get_input(),
        "output": record.get_output(),
        "error": record.error(),
        "nim_metadata": nim.entry.to_json(),
        "nim_config": {
            "host": nim.config.host,
            "port": nim.config.port,
            "nim_type": nim.config.nim_type,
        },
    })
}

/// Creates `record`, dispatches `payload` and returns the settled record view
async fn run(
    state: &AppState,
    nim: &ResolvedNim,
    use_cloud: bool,
    endpoint: Endpoint,
    mut record: InferenceRecord,
    payload: &Value,
) -> GatewayResult<Json<Value>> {
    state.ledger().create(&record).await?;
    tracing::info!(
        nim_id = %nim.nim_id(),
        request_id = %record.request_id,
        nim_type = %nim.nim_type,
        use_cloud,
        "created inference request"
    );

    let mut guard = state
        .metrics_clone()
        .create_inflight_guard(nim.nim_id(), endpoint, false);
    let ctx = InferenceContext {
        state,
        nim,
        use_cloud,
    };
    handlers::dispatch(&ctx, &mut record, payload).await?;
    guard.mark_ok();

    Ok(Json(record_view(&record, nim)))
}

async fn inference_handler(
    State(state): State<Arc<AppState>>,
    Path((publisher, model)): Path<(String, String)>,
    Query(params): Query<InferenceParams>,
    Json(payload): Json<Value>,
) -> GatewayResult<Json<Value>> {
    let nim_id = format!("{publisher}/{model}");
    let nim = handlers::resolve(&state, &nim_id).await?;

    let mut record = InferenceRecord::new(
        RecordKind::ImageGeneration,
        RequestType::ImageGeneration,
        &nim_id,
        &model,
        false,
    );
    record.set_input(&payload);
    run(
        &state,
        &nim,
        params.use_nvidia_api,
        Endpoint::Inference,
        record,
        &payload,
    )
    .await
}

/// An uploaded audio file and the text fields sent with it
#[derive(Debug, Default)]
struct AudioUpload {
    data: Option<Vec<u8>>,
    filename: Option<String>,
    content_type: Option<String>,
    fields: std::collections::HashMap<String, String>,
}

impl AudioUpload {
    async fn read(mut multipart: Multipart) -> GatewayResult<Self> {
        let invalid = |err: axum::extract::multipart::MultipartError| {
            GatewayError::validation(format!("Invalid multipart body: {}", err.body_text()))
        };
        let mut upload = AudioUpload::default();
        while let Some(field) = multipart.next_field().await.map_err(invalid)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "audio_file" {
                upload.filename = field.file_name().map(str::to_string);
                upload.content_type = field.content_type().map(str::to_string);
                upload.data = Some(field.bytes().await.map_err(invalid)?.to_vec());
            } else {
                let value = field.text().await.map_err(invalid)?;
                upload.fields.insert(name, value);
            }
        }
        Ok(upload)
    }

    fn audio(&self) -> GatewayResult<&[u8]> {
        self.data
            .as_deref()
            .ok_or_else(|| GatewayError::validation("audio_file is required"))
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

async fn save_upload(state: &AppState, path: &std::path::Path, data: &[u8]) -> GatewayResult<String> {
    state.media().write(path, data).await.map_err(|err| {
        tracing::error!("failed to save audio upload: {err:#}");
        GatewayError::internal(format!("Failed to save audio file: {err:#}"))
    })?;
    Ok(path.display().to_string())
}

async fn asr_handler(
    State(state): State<Arc<AppState>>,
    Path((publisher, model)): Path<(String, String)>,
    Query(params): Query<InferenceParams>,
    multipart: Multipart,
) -> GatewayResult<Json<Value>> {
    let nim_id = format!("{publisher}/{model}");
    let nim = handlers::resolve(&state, &nim_id).await?;
    if nim.nim_type != NimType::Asr {
        return Err(GatewayError::validation(format!(
            "NIM {nim_id} is not an ASR NIM (type: {})",
            nim.nim_type
        )));
    }

    let upload = AudioUpload::read(multipart).await?;
    let mode = upload.field("mode").unwrap_or("offline").to_string();
    let request_id = Uuid::new_v4().to_string();
    let audio_path = state.media().asr_upload_path(&request_id);
    let audio_path = save_upload(&state, &audio_path, upload.audio()?).await?;

    let mut record = InferenceRecord::with_id(
        request_id,
        RecordKind::Asr,
        RequestType::Asr,
        &nim_id,
        &model,
        false,
    );
    record.audio_file_path = Some(audio_path.clone());
    let input = json!({
        "mode": mode,
        "audio_file_path": audio_path,
        "filename": upload.filename,
        "content_type": upload.content_type,
    });
    record.set_input(&input);
    run(
        &state,
        &nim,
        params.use_nvidia_api,
        Endpoint::Asr,
        record,
        &input,
    )
    .await
}

async fn speech_enhancement_handler(
    State(state): State<Arc<AppState>>,
    Path((publisher, model)): Path<(String, String)>,
    Query(params): Query<InferenceParams>,
    multipart: Multipart,
) -> GatewayResult<Json<Value>> {
    let nim_id = format!("{publisher}/{model}");
    let nim = handlers::resolve(&state, &nim_id).await?;
    if nim.nim_type != NimType::SpeechEnhancement {
        return Err(GatewayError::validation(format!(
            "NIM {nim_id} is not a speech enhancement NIM (type: {})",
            nim.nim_type
        )));
    }

    let upload = AudioUpload::read(multipart).await?;
    let model_type = ModelType::parse(upload.field("model_type"))?;
    let request_id = Uuid::new_v4().to_string();
    let input_path = state.media().studiovoice_input_path(&request_id);
    let input_path = save_upload(&state, &input_path, upload.audio()?).await?;
    let output_path = state.media().studiovoice_output_path(&request_id);

    let mut record = InferenceRecord::with_id(
        request_id,
        RecordKind::SpeechEnhancement,
        RequestType::SpeechEnhancement,
        &nim_id,
        &model,
        false,
    );
    record.audio_file_path = Some(input_path.clone());
    record.output_audio_path = Some(output_path.display().to_string());
    let input = json!({
        "model_type": model_type.as_ref(),
        "audio_file_path": input_path,
        "filename": upload.filename,
        "content_type": upload.content_type,
    });
    record.set_input(&input);
    run(
        &state,
        &nim,
        params.use_nvidia_api,
        Endpoint::SpeechEnhancement,
        record,
        &input,
    )
    .await
}
