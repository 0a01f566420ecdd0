// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NIM Kit gateway: one HTTP API in front of a fleet of NVIDIA inference
//! microservices.
//!
//! Requests are routed by NIM id to a local NIM or to its hosted cloud
//! endpoint, every attempt is persisted as an [`ledger::InferenceRecord`], and
//! the Prometheus metrics of the LLM NIM are ingested for later range queries.

pub mod api_keys;
pub mod catalog;
pub mod config;
pub mod error;
pub mod grpc;
pub mod handlers;
pub mod http;
pub mod imaging;
pub mod ledger;
pub mod llm;
pub mod media;
pub mod metrics_ingest;
pub mod nim_type;
pub mod nims;
pub mod state;
pub mod upstream;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use state::AppState;
