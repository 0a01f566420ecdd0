// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! REST calls to NIMs: endpoint selection, headers and failure classification.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::catalog::CatalogEntry;
use crate::error::{GatewayError, GatewayResult};
use crate::nims::NimConfig;

pub const LOCAL_INFER_PATH: &str = "/v1/infer";

const MISSING_KEY: &str =
    "NVIDIA API key not configured. Please set your API key in the NVIDIA Config page.";

/// Where a request goes and with which credentials
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: String,
    /// Set for cloud endpoints only
    pub api_key: Option<String>,
}

impl Endpoint {
    pub fn is_cloud(&self) -> bool {
        self.api_key.is_some()
    }

    /// JSON accept and content type, plus a bearer token for the cloud
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            match HeaderValue::from_str(&format!("Bearer {key}")) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    headers.insert(AUTHORIZATION, value);
                }
                Err(err) => tracing::warn!(%err, "API key is not a valid header value"),
            }
        }
        headers
    }
}

/// Cloud base URL from the catalog, or `http://host:port` of the local NIM
pub fn base_url(
    nim: &NimConfig,
    entry: &CatalogEntry,
    use_cloud: bool,
) -> GatewayResult<String> {
    if !use_cloud {
        return Ok(nim.base_url());
    }
    entry
        .invoke_url
        .as_deref()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            GatewayError::validation(format!(
                "NVIDIA API invoke_url not found for NIM {}",
                nim.nim_id
            ))
        })
}

/// Cloud calls need a key, local calls go without one
pub fn require_key(api_key: Option<String>, use_cloud: bool) -> GatewayResult<Option<String>> {
    match (use_cloud, api_key) {
        (false, _) => Ok(None),
        (true, Some(key)) => Ok(Some(key)),
        (true, None) => Err(GatewayError::Unauthorized(MISSING_KEY.to_string())),
    }
}

/// The invoke URL as-is for the cloud, `{base}/v1/infer` for a local NIM
pub fn inference_endpoint(
    nim: &NimConfig,
    entry: &CatalogEntry,
    use_cloud: bool,
    api_key: Option<String>,
) -> GatewayResult<Endpoint> {
    let base = base_url(nim, entry, use_cloud)?;
    let api_key = require_key(api_key, use_cloud)?;
    let url = if use_cloud {
        base
    } else {
        format!("{base}{LOCAL_INFER_PATH}")
    };
    Ok(Endpoint { url, api_key })
}

/// Why an upstream call produced no usable JSON
#[derive(Debug, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("NIM responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Decode(String),
}

impl UpstreamFailure {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamFailure::Timeout
        } else if err.is_decode() {
            UpstreamFailure::Decode(err.to_string())
        } else {
            UpstreamFailure::Transport(err.to_string())
        }
    }

    /// The error object written to the ledger for a failed call
    pub fn ledger_error(&self, nim_id: &str, url: &str, timeout: Duration) -> Value {
        match self {
            UpstreamFailure::Status { status, body } => json!({
                "status_code": status,
                "error": body,
                "nim_id": nim_id,
                "invoke_url": url,
            }),
            UpstreamFailure::Timeout => json!({
                "error": "Request timeout",
                "nim_id": nim_id,
                "timeout_seconds": timeout.as_secs(),
            }),
            UpstreamFailure::Transport(err) => json!({
                "error": err,
                "nim_id": nim_id,
                "error_type": "RequestException",
            }),
            UpstreamFailure::Decode(err) => json!({
                "error": err,
                "nim_id": nim_id,
                "error_type": "UnexpectedError",
            }),
        }
    }

    /// The error surfaced to the caller
    pub fn gateway_error(&self, nim_id: &str) -> GatewayError {
        match self {
            UpstreamFailure::Status { status, body } => GatewayError::Upstream(format!(
                "NIM inference failed with status {status}: {body}"
            )),
            UpstreamFailure::Timeout => {
                GatewayError::UpstreamTimeout(format!("NIM inference timeout for {nim_id}"))
            }
            UpstreamFailure::Transport(err) => GatewayError::Upstream(format!(
                "NIM inference request failed for {nim_id}: {err}"
            )),
            UpstreamFailure::Decode(err) => GatewayError::Internal(format!(
                "Unexpected error during inference for {nim_id}: {err}"
            )),
        }
    }
}

/// POSTs `payload` and decodes a JSON reply. Any non-2xx status is a failure.
pub async fn post_json(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    payload: &Value,
    timeout: Duration,
) -> Result<Value, UpstreamFailure> {
    let started = std::time::Instant::now();
    let response = client
        .post(&endpoint.url)
        .headers(endpoint.headers())
        .json(payload)
        .timeout(timeout)
        .send()
        .await
        .map_err(UpstreamFailure::from_reqwest)?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(UpstreamFailure::from_reqwest)?;
    tracing::debug!(
        url = %endpoint.url,
        status = status.as_u16(),
        bytes = body.len(),
        elapsed = %humantime::format_duration(started.elapsed()),
        "NIM responded"
    );

    if !status.is_success() {
        return Err(UpstreamFailure::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).to_string(),
        });
    }
    serde_json::from_slice(&body).map_err(|err| UpstreamFailure::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nim_type::NimType;

    fn nim() -> NimConfig {
        NimConfig {
            nim_id: "bfl/flux".into(),
            host: "10.0.0.5".into(),
            port: 8003,
            nim_type: NimType::Image,
        }
    }

    fn entry(invoke_url: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            id: "bfl/flux".into(),
            nim_type: Some(NimType::Image),
            invoke_url: invoke_url.map(String::from),
            extra: Default::default(),
        }
    }

    #[test]
    fn test_local_endpoint() -> anyhow::Result<()> {
        let endpoint = inference_endpoint(&nim(), &entry(None), false, Some("nvapi-x".into()))?;
        assert_eq!(endpoint.url, "http://10.0.0.5:8003/v1/infer");
        assert!(!endpoint.is_cloud());
        assert!(endpoint.headers().get(AUTHORIZATION).is_none());
        Ok(())
    }

    #[test]
    fn test_cloud_endpoint() -> anyhow::Result<()> {
        let endpoint = inference_endpoint(
            &nim(),
            &entry(Some("https://ai.api.nvidia.com/v1/genai/bfl/flux")),
            true,
            Some("nvapi-x".into()),
        )?;
        assert_eq!(endpoint.url, "https://ai.api.nvidia.com/v1/genai/bfl/flux");
        let headers = endpoint.headers();
        assert_eq!(headers[AUTHORIZATION], "Bearer nvapi-x");
        assert_eq!(headers[ACCEPT], "application/json");
        Ok(())
    }

    #[test]
    fn test_cloud_errors() {
        let err = inference_endpoint(&nim(), &entry(None), true, Some("nvapi-x".into())).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.to_string(), "NVIDIA API invoke_url not found for NIM bfl/flux");

        let err = inference_endpoint(&nim(), &entry(Some("https://x")), true, None).unwrap_err();
        assert_eq!(err.status_code().as_u16(), 401);
    }

    #[test]
    fn test_failure_mapping() {
        let timeout = Duration::from_secs(300);
        let failure = UpstreamFailure::Status {
            status: 422,
            body: "bad prompt".into(),
        };
        let err = failure.ledger_error("bfl/flux", "http://x/v1/infer", timeout);
        assert_eq!(err["status_code"], 422);
        assert_eq!(err["invoke_url"], "http://x/v1/infer");
        let gw = failure.gateway_error("bfl/flux");
        assert_eq!(gw.status_code().as_u16(), 502);
        assert_eq!(gw.to_string(), "NIM inference failed with status 422: bad prompt");

        let err = UpstreamFailure::Timeout.ledger_error("bfl/flux", "u", timeout);
        assert_eq!(err, json!({"error": "Request timeout", "nim_id": "bfl/flux", "timeout_seconds": 300}));
        assert_eq!(
            UpstreamFailure::Timeout.gateway_error("bfl/flux").to_string(),
            "NIM inference timeout for bfl/flux"
        );

        let failure = UpstreamFailure::Transport("connection refused".into());
        assert_eq!(failure.ledger_error("a", "u", timeout)["error_type"], "RequestException");
        assert_eq!(failure.gateway_error("a").status_code().as_u16(), 502);

        let failure = UpstreamFailure::Decode("expected value".into());
        assert_eq!(failure.ledger_error("a", "u", timeout)["error_type"], "UnexpectedError");
        assert_eq!(failure.gateway_error("a").status_code().as_u16(), 500);
    }
}
