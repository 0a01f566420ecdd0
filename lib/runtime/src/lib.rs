// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NIM Kit runtime: layered configuration, logging, storage backends and the
//! HTTP server lifecycle shared by the gateway and its launcher.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod config;
pub use config::RuntimeConfig;

pub mod http_server;
pub use http_server::{HttpServerInfo, spawn_http_server};
pub mod logging;
pub mod storage;

pub use tokio_util::sync::CancellationToken;
