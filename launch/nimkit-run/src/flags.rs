// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use nimkit_gateway::GatewayConfig;
use nimkit_runtime::RuntimeConfig;

/// Command line overrides. Anything left unset comes from the layered
/// configuration files and `NIMKIT_` environment.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct Flags {
    /// Host the HTTP API binds to
    #[arg(long, env = "NIMKIT_HTTP_HOST")]
    pub host: Option<String>,

    /// HTTP port. 0 picks a free port.
    #[arg(long, env = "NIMKIT_HTTP_PORT")]
    pub port: Option<u16>,

    /// Storage backend
    #[arg(long, env = "NIMKIT_STORE", value_parser = ["mem", "file", "redis"])]
    pub store: Option<String>,

    /// YAML catalog of known NIMs
    #[arg(long, env = "NIMKIT_CATALOG_PATH")]
    pub catalog: Option<String>,
}

impl Flags {
    /// Apply the overrides that were given
    pub fn apply(&self, runtime: &mut RuntimeConfig, gateway: &mut GatewayConfig) {
        if let Some(host) = &self.host {
            runtime.http_host = host.clone();
        }
        if let Some(port) = self.port {
            runtime.http_port = port;
        }
        if let Some(store) = &self.store {
            runtime.store = store.clone();
        }
        if let Some(catalog) = &self.catalog {
            gateway.catalog_path = catalog.clone();
        }
    }
}
