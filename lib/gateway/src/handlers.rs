// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dispatch of inference payloads to the protocol handler of the NIM's type.
//!
//! The caller creates the pending ledger record; the handler it lands on moves
//! the record to `completed` or `error`. Errors that escape a handler without
//! settling the record are written here, so every attempt ends terminal.

pub mod asr;
pub mod image;
pub mod ocr;
pub mod speech_enhancement;
pub mod three_d;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::catalog::CatalogEntry;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::InferenceRecord;
use crate::media::UploadPathError;
use crate::nim_type::NimType;
use crate::nims::NimConfig;
use crate::state::AppState;
use crate::upstream::{self, Endpoint};

/// A NIM with both its routing record and its catalog entry
#[derive(Debug, Clone)]
pub struct ResolvedNim {
    pub config: NimConfig,
    pub entry: CatalogEntry,
    /// The catalog type, or the record's when the catalog leaves it blank
    pub nim_type: NimType,
}

impl ResolvedNim {
    pub fn nim_id(&self) -> &str {
        &self.config.nim_id
    }
}

/// Looks up the routing record and then the catalog entry of `nim_id`
pub async fn resolve(state: &AppState, nim_id: &str) -> GatewayResult<ResolvedNim> {
    let config = state.nims().get(nim_id).await?.ok_or_else(|| {
        GatewayError::not_found(format!("NIM {nim_id} not found in Redis configuration"))
    })?;
    let entry = state
        .catalog()
        .get(nim_id)
        .cloned()
        .ok_or_else(|| GatewayError::not_found(format!("NIM {nim_id} not found in catalog")))?;
    let nim_type = entry
        .declared_type()
        .cloned()
        .unwrap_or_else(|| config.nim_type.clone());
    tracing::debug!(%nim_id, %nim_type, "resolved NIM");
    Ok(ResolvedNim {
        config,
        entry,
        nim_type,
    })
}

/// Everything a handler needs besides the record and payload
pub struct InferenceContext<'a> {
    pub state: &'a AppState,
    pub nim: &'a ResolvedNim,
    /// Route to the hosted endpoint instead of the local NIM
    pub use_cloud: bool,
}

impl InferenceContext<'_> {
    pub fn nim_id(&self) -> &str {
        self.nim.nim_id()
    }

    /// The stored or environment key for cloud calls, nothing for local ones
    pub async fn api_key(&self) -> GatewayResult<Option<String>> {
        if !self.use_cloud {
            return Ok(None);
        }
        upstream::require_key(self.state.api_keys().key().await?, true)
    }

    /// REST endpoint of the NIM: the invoke URL or `http://host:port/v1/infer`
    pub async fn endpoint(&self) -> GatewayResult<Endpoint> {
        let api_key = self.api_key().await?;
        upstream::inference_endpoint(&self.nim.config, &self.nim.entry, self.use_cloud, api_key)
    }

    /// POSTs `payload`. A failed call is written to the ledger before it is returned.
    pub async fn post(
        &self,
        record: &mut InferenceRecord,
        endpoint: &Endpoint,
        payload: &Value,
        timeout: Duration,
    ) -> GatewayResult<Value> {
        tracing::info!(
            nim_id = %self.nim_id(),
            request_id = %record.request_id,
            url = %endpoint.url,
            cloud = endpoint.is_cloud(),
            "invoking NIM"
        );
        match upstream::post_json(self.state.client(), endpoint, payload, timeout).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                tracing::error!(nim_id = %self.nim_id(), request_id = %record.request_id, %failure, "NIM inference failed");
                let error = failure.ledger_error(self.nim_id(), &endpoint.url, timeout);
                self.state.ledger().fail(record, &error).await?;
                Err(failure.gateway_error(self.nim_id()))
            }
        }
    }

    /// Marks the record failed with `error` and hands `err` back
    pub async fn fail(
        &self,
        record: &mut InferenceRecord,
        error: Value,
        err: GatewayError,
    ) -> GatewayError {
        if let Err(ledger_err) = self.state.ledger().fail(record, &error).await {
            tracing::error!(request_id = %record.request_id, %ledger_err, "failed to record inference error");
        }
        err
    }
}

/// The `audio_file_path` of `payload`, accepted only when it names a file the
/// upload endpoints stored under `dir`
pub(crate) async fn uploaded_audio(
    ctx: &InferenceContext<'_>,
    payload: &Value,
    dir: &Path,
) -> GatewayResult<PathBuf> {
    let path = payload
        .get("audio_file_path")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::validation(UploadPathError::NotFound.to_string()))?;
    ctx.state
        .media()
        .resolve_upload(dir, path)
        .await
        .map_err(|err| {
            tracing::warn!(nim_id = %ctx.nim_id(), %path, %err, "rejected audio file path");
            GatewayError::validation(err.to_string())
        })
}

/// One protocol handler per supported NIM type
#[async_trait]
pub trait InferenceHandler: Send + Sync {
    /// Calls the NIM, settles `record` and returns the output
    async fn invoke(
        &self,
        ctx: &InferenceContext<'_>,
        record: &mut InferenceRecord,
        payload: &Value,
    ) -> GatewayResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum HandlerKind {
    ImageGeneration,
    ThreeD,
    Asr,
    SpeechEnhancement,
    PaddleOcr,
}

impl HandlerKind {
    /// The handler for `nim_type`. LLMs have their own endpoints.
    pub fn for_type(nim_type: &NimType) -> GatewayResult<Self> {
        match nim_type {
            NimType::Image => Ok(HandlerKind::ImageGeneration),
            NimType::ThreeD => Ok(HandlerKind::ThreeD),
            NimType::Asr => Ok(HandlerKind::Asr),
            NimType::SpeechEnhancement => Ok(HandlerKind::SpeechEnhancement),
            NimType::PaddleOcr => Ok(HandlerKind::PaddleOcr),
            NimType::Llm | NimType::Unknown(_) => Err(GatewayError::validation(format!(
                "NIM type '{nim_type}' is not supported for inference"
            ))),
        }
    }

    fn handler(self) -> &'static dyn InferenceHandler {
        match self {
            HandlerKind::ImageGeneration => &image::ImageGeneration,
            HandlerKind::ThreeD => &three_d::ThreeDGeneration,
            HandlerKind::Asr => &asr::SpeechRecognition,
            HandlerKind::SpeechEnhancement => &speech_enhancement::StudioVoice,
            HandlerKind::PaddleOcr => &ocr::PaddleOcr,
        }
    }
}

/// Runs the handler of the NIM's type on a pending record
pub async fn dispatch(
    ctx: &InferenceContext<'_>,
    record: &mut InferenceRecord,
    payload: &Value,
) -> GatewayResult<Value> {
    let result = match HandlerKind::for_type(&ctx.nim.nim_type) {
        Ok(kind) => {
            tracing::debug!(nim_id = %ctx.nim_id(), request_id = %record.request_id, handler = %kind, "dispatching");
            kind.handler().invoke(ctx, record, payload).await
        }
        Err(err) => Err(err),
    };

    if let Err(err) = &result {
        if !record.status.is_terminal() {
            let error = json!({
                "error": err.to_string(),
                "nim_id": ctx.nim_id(),
                "error_type": error_type(err),
            });
            if let Err(ledger_err) = ctx.state.ledger().fail(record, &error).await {
                tracing::error!(request_id = %record.request_id, %ledger_err, "failed to record inference error");
            }
        }
    }
    result
}

fn error_type(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::NotFound(_) => "NotFound",
        GatewayError::Validation(_) => "ValidationError",
        GatewayError::Unauthorized(_) => "AuthenticationError",
        GatewayError::Upstream(_) => "RequestException",
        GatewayError::UpstreamTimeout(_) => "Timeout",
        GatewayError::Internal(_) | GatewayError::Unavailable(_) => "UnexpectedError",
    }
}
