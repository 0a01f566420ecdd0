// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{InferenceContext, InferenceHandler};
use crate::error::GatewayResult;
use crate::ledger::InferenceRecord;

/// Cloud image generation is slow
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Image generation: the payload goes to the NIM as-is and its reply is the output.
pub struct ImageGeneration;

#[async_trait]
impl InferenceHandler for ImageGeneration {
    async fn invoke(
        &self,
        ctx: &InferenceContext<'_>,
        record: &mut InferenceRecord,
        payload: &Value,
    ) -> GatewayResult<Value> {
        let endpoint = ctx.endpoint().await?;
        let output = ctx.post(record, &endpoint, payload, IMAGE_TIMEOUT).await?;
        ctx.state.ledger().complete(record, &output).await?;
        Ok(output)
    }
}
