// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use super::{InferenceContext, InferenceHandler};
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::InferenceRecord;

pub const THREE_D_TIMEOUT: Duration = Duration::from_secs(600);

const DECODE_FAILED: &str = "Failed to decode GLB data from base64";

/// 3D generation. The first artifact of the reply is saved as a GLB model
/// named after the request.
pub struct ThreeDGeneration;

#[async_trait]
impl InferenceHandler for ThreeDGeneration {
    async fn invoke(
        &self,
        ctx: &InferenceContext<'_>,
        record: &mut InferenceRecord,
        payload: &Value,
    ) -> GatewayResult<Value> {
        let endpoint = ctx.endpoint().await?;
        let output = ctx.post(record, &endpoint, payload, THREE_D_TIMEOUT).await?;
        ctx.state.ledger().store_output(record, &output).await?;

        if let Some(glb) = first_artifact(&output) {
            let data = match STANDARD.decode(glb) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!(request_id = %record.request_id, %err, "failed to decode GLB artifact");
                    let error = json!({
                        "error": DECODE_FAILED,
                        "nim_id": ctx.nim_id(),
                        "error_type": "UnexpectedError",
                    });
                    return Err(ctx
                        .fail(record, error, GatewayError::internal(DECODE_FAILED))
                        .await);
                }
            };

            let path = ctx.state.media().model_path(&record.request_id);
            if let Err(err) = ctx.state.media().write(&path, &data).await {
                let detail = format!("Failed to save GLB file: {err:#}");
                tracing::error!(request_id = %record.request_id, "{detail}");
                let error = json!({
                    "error": detail,
                    "nim_id": ctx.nim_id(),
                    "error_type": "UnexpectedError",
                });
                return Err(ctx.fail(record, error, GatewayError::internal(detail)).await);
            }
            tracing::info!(request_id = %record.request_id, path = %path.display(), bytes = data.len(), "saved GLB model");
        }

        ctx.state.ledger().complete(record, &output).await?;
        Ok(output)
    }
}

/// base64 of `artifacts[0]`, when the reply carries one
fn first_artifact(output: &Value) -> Option<&str> {
    let Some(artifact) = output
        .get("artifacts")
        .and_then(Value::as_array)
        .and_then(|artifacts| artifacts.first())
    else {
        tracing::warn!("no artifacts found in 3D response");
        return None;
    };
    match artifact.get("base64").and_then(Value::as_str) {
        Some(data) if !data.is_empty() => {
            tracing::debug!(
                finish_reason = artifact.get("finishReason").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                chars = data.len(),
                "found GLB artifact"
            );
            Some(data)
        }
        _ => {
            tracing::warn!("no base64 data found in 3D artifact");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(json!({}), None)]
    #[case(json!({"artifacts": []}), None)]
    #[case(json!({"artifacts": [{"finishReason": "SUCCESS"}]}), None)]
    #[case(json!({"artifacts": [{"base64": ""}]}), None)]
    #[case(json!({"artifacts": [{"base64": "Z2xURg=="}, {"base64": "b3RoZXI="}]}), Some("Z2xURg=="))]
    fn test_first_artifact(#[case] output: Value, #[case] expected: Option<&str>) {
        assert_eq!(first_artifact(&output), expected);
    }
}
