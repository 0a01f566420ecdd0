// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Studio Voice speech enhancement over a bidirectional gRPC stream.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use super::{InferenceContext, InferenceHandler, uploaded_audio};
use crate::error::{GatewayError, GatewayResult};
use crate::grpc::studiovoice::maxine_studio_voice_client::MaxineStudioVoiceClient;
use crate::grpc::studiovoice::{
    EnhanceAudioRequest, enhance_audio_request::StreamInput, enhance_audio_response::StreamOutput,
};
use crate::grpc::{GrpcError, GrpcTarget, STUDIOVOICE_FUNCTION_ID, STUDIOVOICE_PORT};
use crate::ledger::InferenceRecord;
use crate::media;

/// Input is streamed up in chunks of this size
const CHUNK_SIZE: usize = 64 * 1024;

/// Studio Voice model variants
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum ModelType {
    #[default]
    #[strum(serialize = "48k-hq")]
    HighQuality48k,
    #[strum(serialize = "48k-ll")]
    LowLatency48k,
    #[strum(serialize = "16k-hq")]
    HighQuality16k,
}

impl ModelType {
    pub fn sample_rate(&self) -> u32 {
        match self {
            ModelType::HighQuality16k => 16_000,
            ModelType::HighQuality48k | ModelType::LowLatency48k => 48_000,
        }
    }

    /// Parses a form value, `None` meaning the default
    pub fn parse(value: Option<&str>) -> GatewayResult<Self> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(ModelType::default()),
            Some(value) => value.parse().map_err(|_| {
                GatewayError::validation(format!(
                    "Invalid model_type '{value}'. Must be one of: 48k-hq, 48k-ll, 16k-hq"
                ))
            }),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum EnhanceError {
    #[error(transparent)]
    Grpc(#[from] GrpcError),

    #[error("{0:#}")]
    Io(anyhow::Error),
}

impl From<tonic::Status> for EnhanceError {
    fn from(status: tonic::Status) -> Self {
        EnhanceError::Grpc(status.into())
    }
}

pub struct StudioVoice;

#[async_trait]
impl InferenceHandler for StudioVoice {
    async fn invoke(
        &self,
        ctx: &InferenceContext<'_>,
        record: &mut InferenceRecord,
        payload: &Value,
    ) -> GatewayResult<Value> {
        let input_path =
            uploaded_audio(ctx, payload, &ctx.state.media().studiovoice_input_dir()).await?;
        let model_type = ModelType::parse(payload.get("model_type").and_then(Value::as_str))?;
        let sample_rate = model_type.sample_rate();

        let audio = tokio::fs::read(&input_path)
            .await
            .map_err(|err| GatewayError::internal(format!("Failed to read audio file: {err}")))?;
        if let Some(actual) = wav_sample_rate(&audio)
            && actual != sample_rate
        {
            tracing::warn!(expected = sample_rate, actual, "sample rate mismatch");
        }

        let target = match ctx.api_key().await? {
            Some(key) => GrpcTarget::cloud(STUDIOVOICE_FUNCTION_ID, key),
            None => GrpcTarget::local(&ctx.nim.config.host, STUDIOVOICE_PORT),
        };
        let output_path = ctx.state.media().studiovoice_output_path(&record.request_id);
        tracing::info!(
            nim_id = %ctx.nim_id(),
            request_id = %record.request_id,
            url = %target.url,
            %model_type,
            "enhancing audio"
        );

        let started = Instant::now();
        let chunks = match enhance(&target, audio, &output_path).await {
            Ok(chunks) => chunks,
            Err(EnhanceError::Grpc(err)) => {
                tracing::error!(request_id = %record.request_id, %err, "Studio Voice gRPC call failed");
                let detail = format!("gRPC error during Studio Voice inference: {err}");
                return Err(ctx
                    .fail(record, err.ledger_error(), GatewayError::Upstream(detail))
                    .await);
            }
            Err(EnhanceError::Io(err)) => {
                tracing::error!(request_id = %record.request_id, "Studio Voice output failed: {err:#}");
                let error = json!({"error": format!("{err:#}"), "error_type": "IOError"});
                let detail = format!("Unexpected error during Studio Voice inference: {err:#}");
                return Err(ctx.fail(record, error, GatewayError::internal(detail)).await);
            }
        };
        let elapsed = started.elapsed();
        tracing::info!(
            request_id = %record.request_id,
            chunks,
            elapsed = %humantime::format_duration(elapsed),
            "Studio Voice enhancement completed"
        );

        let output_file = output_path.display().to_string();
        let output = json!({
            "enhanced_audio_path": output_file,
            "model_type": model_type.as_ref(),
            "sample_rate": sample_rate,
            "processing_time_seconds": elapsed.as_secs_f64(),
            "response_chunks": chunks,
            "input_file": input_path.display().to_string(),
            "output_file": output_file,
            "api_type": target.api_type(),
        });
        ctx.state.ledger().complete(record, &output).await?;
        Ok(output)
    }
}

/// Streams `audio` up and writes the returned audio to `output_path`.
/// Returns the number of response messages.
async fn enhance(target: &GrpcTarget, audio: Vec<u8>, output_path: &Path) -> Result<usize, EnhanceError> {
    let requests: Vec<EnhanceAudioRequest> = audio
        .chunks(CHUNK_SIZE)
        .map(|chunk| EnhanceAudioRequest {
            stream_input: Some(StreamInput::AudioStreamData(chunk.to_vec())),
        })
        .collect();

    let channel = target.connect().await?;
    let mut client = MaxineStudioVoiceClient::new(channel);
    let request = target.request(tokio_stream::iter(requests))?;
    let mut responses = client.enhance_audio(request).await?.into_inner();

    media::ensure_parent(output_path).await.map_err(EnhanceError::Io)?;
    let mut file = tokio::fs::File::create(output_path)
        .await
        .with_context(|| format!("Failed to create {}", output_path.display()))
        .map_err(EnhanceError::Io)?;

    let mut count = 0;
    while let Some(response) = responses.message().await? {
        count += 1;
        if let Some(StreamOutput::AudioStreamData(data)) = response.stream_output {
            file.write_all(&data)
                .await
                .with_context(|| format!("Failed to write {}", output_path.display()))
                .map_err(EnhanceError::Io)?;
        }
    }
    file.flush()
        .await
        .context("Failed to flush enhanced audio")
        .map_err(EnhanceError::Io)?;
    Ok(count)
}

/// Sample rate from a RIFF/WAVE header
fn wav_sample_rate(audio: &[u8]) -> Option<u32> {
    if audio.len() < 28 || &audio[0..4] != b"RIFF" || &audio[8..12] != b"WAVE" {
        return None;
    }
    Some(u32::from_le_bytes([audio[24], audio[25], audio[26], audio[27]]))
}
