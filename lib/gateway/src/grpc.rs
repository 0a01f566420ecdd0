// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! gRPC clients for the speech NIMs and how to reach them locally or on NVCF.

use std::time::Duration;

use serde_json::{Value, json};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

pub mod riva_asr {
    tonic::include_proto!("nvidia.riva.asr");
}

pub mod studiovoice {
    tonic::include_proto!("nvidia.maxine.studiovoice.v1");
}

/// NVIDIA Cloud Functions gRPC gateway
pub const NVCF_GRPC_URL: &str = "https://grpc.nvcf.nvidia.com:443";

pub const RIVA_ASR_PORT: u16 = 50051;
pub const RIVA_ASR_FUNCTION_ID: &str = "d8dd4e9b-fbf5-4fb0-9dba-8cf436c8d965";

pub const STUDIOVOICE_PORT: u16 = 8001;
pub const STUDIOVOICE_FUNCTION_ID: &str = "7cf12edb-2181-4947-8b19-2b1c18270588";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum GrpcError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: tonic::transport::Error,
    },

    #[error("{}", .0.message())]
    Status(#[from] tonic::Status),

    #[error("invalid request metadata: {0}")]
    Metadata(#[from] tonic::metadata::errors::InvalidMetadataValue),
}

impl GrpcError {
    /// Human-readable details, the server message for a status
    pub fn details(&self) -> String {
        match self {
            GrpcError::Status(status) if !status.message().is_empty() => {
                status.message().to_string()
            }
            GrpcError::Status(status) => format!("{:?}", status.code()),
            other => other.to_string(),
        }
    }

    pub fn code_name(&self) -> String {
        match self {
            GrpcError::Status(status) => format!("{:?}", status.code()),
            GrpcError::Connect { .. } => "Unavailable".to_string(),
            GrpcError::Metadata(_) => "InvalidArgument".to_string(),
        }
    }

    /// The error object written to the ledger
    pub fn ledger_error(&self) -> Value {
        json!({
            "error": format!("gRPC error: {self}"),
            "grpc_status": self.code_name(),
            "grpc_details": self.details(),
        })
    }
}

/// Where a gRPC call goes, plus the NVCF credentials for a cloud call
#[derive(Debug, Clone, PartialEq)]
pub struct GrpcTarget {
    pub url: String,
    cloud: Option<CloudAuth>,
}

#[derive(Debug, Clone, PartialEq)]
struct CloudAuth {
    function_id: &'static str,
    api_key: String,
}

impl GrpcTarget {
    /// Plaintext HTTP/2 to a NIM on `host:port`
    pub fn local(host: &str, port: u16) -> Self {
        GrpcTarget {
            url: format!("http://{host}:{port}"),
            cloud: None,
        }
    }

    /// TLS to NVCF, routed to `function_id`
    pub fn cloud(function_id: &'static str, api_key: impl Into<String>) -> Self {
        GrpcTarget {
            url: NVCF_GRPC_URL.to_string(),
            cloud: Some(CloudAuth {
                function_id,
                api_key: api_key.into(),
            }),
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.cloud.is_some()
    }

    /// `nvidia_cloud` or `local_nim`
    pub fn api_type(&self) -> &'static str {
        if self.is_cloud() {
            "nvidia_cloud"
        } else {
            "local_nim"
        }
    }

    pub async fn connect(&self) -> Result<Channel, GrpcError> {
        let connect_error = |source| GrpcError::Connect {
            url: self.url.clone(),
            source,
        };
        let mut endpoint = Endpoint::from_shared(self.url.clone())
            .map_err(connect_error)?
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_nodelay(true);
        if self.is_cloud() {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(connect_error)?;
        }
        let channel = endpoint.connect().await.map_err(connect_error)?;
        tracing::debug!(url = %self.url, cloud = self.is_cloud(), "gRPC channel connected");
        Ok(channel)
    }

    /// Wraps `message`, adding `function-id` and `authorization` metadata for the cloud
    pub fn request<T>(&self, message: T) -> Result<tonic::Request<T>, GrpcError> {
        let mut request = tonic::Request::new(message);
        if let Some(auth) = &self.cloud {
            let metadata = request.metadata_mut();
            metadata.insert("function-id", MetadataValue::from_static(auth.function_id));
            let mut bearer: MetadataValue<Ascii> = format!("Bearer {}", auth.api_key).parse()?;
            bearer.set_sensitive(true);
            metadata.insert("authorization", bearer);
        }
        Ok(request)
    }
}
