// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nimkit_runtime::storage::key_value_store::StoreError;
use serde::Serialize;

use crate::ledger::LedgerError;

/// Every failure the HTTP surface can report. The message is the `detail` of the body.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    UpstreamTimeout(String),

    #[error("{0}")]
    Internal(String),

    /// Only returned by the health proxy
    #[error("{0}")]
    Unavailable(String),
}

/// `{"detail": "..."}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GatewayError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), detail = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Internal(format!("Storage error: {err}"))
    }
}

impl From<LedgerError> for GatewayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(_) => GatewayError::NotFound(err.to_string()),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(GatewayError::not_found("x"), 404)]
    #[case(GatewayError::validation("x"), 400)]
    #[case(GatewayError::Unauthorized("x".into()), 401)]
    #[case(GatewayError::Upstream("x".into()), 502)]
    #[case(GatewayError::UpstreamTimeout("x".into()), 504)]
    #[case(GatewayError::internal("x"), 500)]
    #[case(GatewayError::Unavailable("x".into()), 503)]
    fn test_status_codes(#[case] err: GatewayError, #[case] status: u16) {
        assert_eq!(err.status_code().as_u16(), status);
    }

    #[tokio::test]
    async fn test_body_is_detail() -> anyhow::Result<()> {
        let response = GatewayError::not_found("NIM meta/llama not found in catalog").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(
            value,
            serde_json::json!({"detail": "NIM meta/llama not found in catalog"})
        );
        Ok(())
    }

    #[test]
    fn test_ledger_missing_is_not_found() {
        let err: GatewayError = LedgerError::NotFound("abc".into()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        let err: GatewayError = LedgerError::AlreadyTerminal("abc".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
