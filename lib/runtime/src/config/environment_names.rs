// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable name constants, grouped by functional area.
//!
//! - **Logging**: log level, configuration file and output format
//! - **Config**: layered configuration file and server settings
//! - **Store**: key-value and time-series backends
//! - **Gateway**: gateway settings and credentials

/// Prefix applied to every configuration key read from the environment
pub const NIMKIT_ENV_PREFIX: &str = "NIMKIT_";

/// Logging and tracing environment variables
pub mod logging {
    /// Log filter directives (e.g., "debug", "nimkit_gateway=trace")
    pub const NIMKIT_LOG: &str = "NIMKIT_LOG";

    /// Path to logging configuration file
    pub const NIMKIT_LOGGING_CONFIG_PATH: &str = "NIMKIT_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const NIMKIT_LOGGING_JSONL: &str = "NIMKIT_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const NIMKIT_DISABLE_ANSI_LOGGING: &str = "NIMKIT_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const NIMKIT_LOG_USE_LOCAL_TZ: &str = "NIMKIT_LOG_USE_LOCAL_TZ";
}

/// Configuration file and HTTP server settings
pub mod config {
    /// Optional TOML file merged over `/opt/nimkit/etc/gateway.toml`
    pub const NIMKIT_CONFIG_PATH: &str = "NIMKIT_CONFIG_PATH";

    /// HTTP bind host
    pub const NIMKIT_HTTP_HOST: &str = "NIMKIT_HTTP_HOST";

    /// HTTP bind port
    pub const NIMKIT_HTTP_PORT: &str = "NIMKIT_HTTP_PORT";

    /// Seconds to wait for in-flight requests on shutdown
    pub const NIMKIT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS: &str = "NIMKIT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS";
}

/// Storage backends
pub mod store {
    /// Which backend to use: `mem`, `file` or `redis`
    pub const NIMKIT_STORE: &str = "NIMKIT_STORE";

    /// Root directory for the `file` backend
    pub const NIMKIT_FILE_STORE_ROOT: &str = "NIMKIT_FILE_STORE_ROOT";

    /// Redis connection URL, unprefixed for compatibility with existing deployments
    pub const REDIS_URL: &str = "REDIS_URL";
}

/// Gateway settings and credentials
pub mod gateway {
    /// Fallback NVIDIA cloud API key, used when none is stored
    pub const NVIDIA_API_KEY: &str = "NVIDIA_API_KEY";

    /// YAML catalog of known NIMs
    pub const NIMKIT_CATALOG_PATH: &str = "NIMKIT_CATALOG_PATH";

    /// Directory for uploaded audio, generated models and visualizations
    pub const NIMKIT_MEDIA_ROOT: &str = "NIMKIT_MEDIA_ROOT";

    /// Seconds between Prometheus scrapes, 0 disables the scraper
    pub const NIMKIT_METRICS_SCRAPE_INTERVAL_SECS: &str = "NIMKIT_METRICS_SCRAPE_INTERVAL_SECS";

    /// TrueType font for OCR labels
    pub const NIMKIT_OCR_FONT_PATH: &str = "NIMKIT_OCR_FONT_PATH";
}
