// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use derive_builder::Builder;
use figment::Figment;
use nimkit_runtime::config::layered_figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

const DEFAULT_CATALOG_PATH: &str = "nims.yml";
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 15;

/// 7 days
const DEFAULT_METRICS_RETENTION_MS: u64 = 604_800_000;

/// Scraped when no `llm` NIM is configured
const DEFAULT_METRICS_FALLBACK_URL: &str = "http://localhost:8000";

/// Gateway configuration
/// Read from the same TOML files and `NIMKIT_` environment as [`nimkit_runtime::RuntimeConfig`]
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct GatewayConfig {
    /// YAML list of known NIMs
    /// Set this at runtime with environment variable NIMKIT_CATALOG_PATH
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_CATALOG_PATH.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub catalog_path: String,

    /// Root directory for media artifacts
    /// Set this at runtime with environment variable NIMKIT_MEDIA_ROOT
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_MEDIA_ROOT.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub media_root: String,

    /// Cloud API key used when none is stored
    /// Set this at runtime with environment variable NVIDIA_API_KEY
    #[builder(default)]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub nvidia_api_key: Option<String>,

    /// Seconds between Prometheus scrapes. 0 disables periodic ingestion.
    #[builder(default = "DEFAULT_SCRAPE_INTERVAL_SECS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub metrics_scrape_interval_secs: u64,

    /// Retention of ingested series
    #[validate(range(min = 1))]
    #[builder(default = "DEFAULT_METRICS_RETENTION_MS")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub metrics_retention_ms: u64,

    /// Base URL scraped when no `llm` NIM is configured
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_METRICS_FALLBACK_URL.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub metrics_fallback_url: String,

    /// TrueType font used to label OCR detections. Without one only boxes are drawn.
    #[builder(default)]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub ocr_font_path: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            catalog_path: DEFAULT_CATALOG_PATH.to_string(),
            media_root: DEFAULT_MEDIA_ROOT.to_string(),
            nvidia_api_key: None,
            metrics_scrape_interval_secs: DEFAULT_SCRAPE_INTERVAL_SECS,
            metrics_retention_ms: DEFAULT_METRICS_RETENTION_MS,
            metrics_fallback_url: DEFAULT_METRICS_FALLBACK_URL.to_string(),
            ocr_font_path: None,
        }
    }
}

impl fmt::Display for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "catalog_path={}, ", self.catalog_path)?;
        write!(f, "media_root={}, ", self.media_root)?;
        // never print the key itself
        write!(f, "nvidia_api_key={}, ", self.nvidia_api_key.is_some())?;
        write!(
            f,
            "metrics_scrape_interval={}, ",
            humantime::format_duration(self.scrape_interval().unwrap_or_default())
        )?;
        write!(f, "metrics_retention_ms={}", self.metrics_retention_ms)
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    fn figment() -> Figment {
        layered_figment(GatewayConfig::default())
    }

    /// Load the gateway configuration with the same precedence as the runtime configuration
    pub fn from_settings() -> Result<GatewayConfig> {
        let config: GatewayConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// `None` when periodic ingestion is disabled
    pub fn scrape_interval(&self) -> Option<Duration> {
        match self.metrics_scrape_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(&self.media_root)
    }
}

impl GatewayConfigBuilder {
    /// Build and validate the gateway configuration
    pub fn build(&self) -> Result<GatewayConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}
