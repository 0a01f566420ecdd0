// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use ab_glyph::FontArc;
use anyhow::Context;
use nimkit_runtime::storage::key_value_store::Manager;

use crate::api_keys::ApiKeys;
use crate::catalog::Catalog;
use crate::config::GatewayConfig;
use crate::http::service::metrics::Metrics;
use crate::ledger::Ledger;
use crate::media::MediaStore;
use crate::metrics_ingest::MetricsIngester;
use crate::nims::NimStore;

/// Services shared by every request. Built once at startup and handed to the
/// routers as `Arc<AppState>`.
pub struct AppState {
    manager: Manager,
    nims: NimStore,
    catalog: Arc<Catalog>,
    ledger: Ledger,
    client: reqwest::Client,
    api_keys: ApiKeys,
    media: MediaStore,
    ingester: Arc<MetricsIngester>,
    metrics: Arc<Metrics>,
    font: Option<FontArc>,
    config: GatewayConfig,
}

impl AppState {
    /// Loads the catalog and OCR font named in `config`
    pub fn new(manager: Manager, config: GatewayConfig) -> anyhow::Result<Self> {
        let catalog = Catalog::load(&config.catalog_path)?;
        Self::with_catalog(manager, config, catalog)
    }

    pub fn with_catalog(
        manager: Manager,
        config: GatewayConfig,
        catalog: Catalog,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let nims = NimStore::new(manager.clone());
        let ingester = MetricsIngester::new(
            manager.time_series(),
            nims.clone(),
            client.clone(),
            config.metrics_retention_ms,
            config.metrics_fallback_url.clone(),
        );
        let font = config.ocr_font_path.as_deref().and_then(load_font);

        Ok(AppState {
            nims,
            catalog: Arc::new(catalog),
            ledger: Ledger::new(manager.clone()),
            api_keys: ApiKeys::new(manager.clone(), config.nvidia_api_key.clone()),
            media: MediaStore::new(config.media_root()),
            ingester: Arc::new(ingester),
            metrics: Arc::new(Metrics::new()?),
            client,
            font,
            manager,
            config,
        })
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn nims(&self) -> &NimStore {
        &self.nims
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn api_keys(&self) -> &ApiKeys {
        &self.api_keys
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn ingester(&self) -> Arc<MetricsIngester> {
        self.ingester.clone()
    }

    pub fn metrics_clone(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Font for OCR labels, when one is configured and loads
    pub fn font(&self) -> Option<&FontArc> {
        self.font.as_ref()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

fn load_font(path: &str) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(%path, %err, "failed to read OCR font, labels will not be drawn");
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(err) => {
            tracing::warn!(%path, %err, "invalid OCR font, labels will not be drawn");
            None
        }
    }
}
