// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use nimkit_gateway::{AppState, GatewayConfig, http::service::HttpService};
use nimkit_runtime::storage::key_value_store::{Manager, Selector};
use nimkit_runtime::{CancellationToken, RuntimeConfig, logging, spawn_http_server};
use tokio::task::JoinHandle;

mod flags;
use flags::Flags;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let flags = Flags::parse();
    if let Err(err) = run(flags).await {
        tracing::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run(flags: Flags) -> anyhow::Result<()> {
    let mut runtime_config = RuntimeConfig::from_settings()?;
    let mut gateway_config = GatewayConfig::from_settings()?;
    flags.apply(&mut runtime_config, &mut gateway_config);
    tracing::info!(%runtime_config, "runtime config");
    tracing::info!(%gateway_config, "gateway config");

    let selector = Selector::from_config(&runtime_config)?;
    let manager = Manager::from_selector(&selector)
        .await
        .with_context(|| format!("Failed to open store {selector}"))?;

    let scrape_interval = gateway_config.scrape_interval();
    let state = Arc::new(AppState::new(manager.clone(), gateway_config)?);
    let service = HttpService::new(state.clone())?;
    for route in service.route_docs() {
        tracing::debug!(%route, "route");
    }

    let cancel_token = CancellationToken::new();
    let server = spawn_http_server(
        &runtime_config.http_host,
        runtime_config.http_port,
        service.router(),
        cancel_token.clone(),
    )
    .await?;
    tracing::info!(address = %server.address(), "NIM Kit gateway listening");

    let ingest = scrape_interval.map(|interval| spawn_ingest(state.clone(), interval, cancel_token.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    cancel_token.cancel();

    let grace = Duration::from_secs(runtime_config.graceful_shutdown_timeout_secs);
    if let Some(ingest) = ingest {
        let _ = tokio::time::timeout(grace, ingest).await;
    }
    match Arc::try_unwrap(server.handle) {
        Ok(handle) => {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(
                    grace = %humantime::format_duration(grace),
                    "in-flight requests did not finish before the grace period"
                );
            }
        }
        Err(_) => tracing::warn!("server handle still shared, not waiting for it"),
    }

    manager.shutdown();
    tracing::info!("NIM Kit gateway stopped");
    Ok(())
}

/// Scrapes the LLM NIM metrics every `interval` until cancelled
fn spawn_ingest(state: Arc<AppState>, interval: Duration, cancel_token: CancellationToken) -> JoinHandle<()> {
    tracing::info!(interval = %humantime::format_duration(interval), "starting metrics ingestion");
    let ingester = state.ingester();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = ingester.ingest().await;
                    tracing::debug!(
                        parsed = report.parsed,
                        written = report.written,
                        errors = report.errors,
                        "metrics ingest tick"
                    );
                }
            }
        }
        tracing::debug!("metrics ingestion stopped");
    })
}
