// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

pub mod environment_names;

use environment_names::NIMKIT_ENV_PREFIX;

/// Default bind host for the HTTP API
const DEFAULT_HTTP_HOST: &str = "0.0.0.0";

/// Default bind port for the HTTP API
const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default root for the file-backed store
const DEFAULT_FILE_STORE_ROOT: &str = "/tmp/nimkit/store";

/// System-wide configuration file, merged before `NIMKIT_CONFIG_PATH`
pub const SYSTEM_CONFIG_PATH: &str = "/opt/nimkit/etc/gateway.toml";

/// Runtime configuration
/// Defines the HTTP listener, the storage backend and shutdown behavior
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct RuntimeConfig {
    /// Host the HTTP API binds to
    /// Set this at runtime with environment variable NIMKIT_HTTP_HOST
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_HTTP_HOST.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub http_host: String,

    /// Port the HTTP API binds to. 0 binds to a random available port.
    /// Set this at runtime with environment variable NIMKIT_HTTP_PORT
    #[builder(default = "DEFAULT_HTTP_PORT")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub http_port: u16,

    /// Storage backend selector: `mem`, `file` or `redis`
    /// Set this at runtime with environment variable NIMKIT_STORE
    #[validate(custom(function = "validate_store_selector"))]
    #[builder(default = "\"redis\".to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub store: String,

    /// Redis connection URL
    /// Set this at runtime with environment variable REDIS_URL or NIMKIT_REDIS_URL
    #[validate(length(min = 1))]
    #[builder(default = "DEFAULT_REDIS_URL.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub redis_url: String,

    /// Root directory of the file-backed store
    /// Set this at runtime with environment variable NIMKIT_FILE_STORE_ROOT
    #[builder(default = "DEFAULT_FILE_STORE_ROOT.to_string()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub file_store_root: String,

    /// Grace period for in-flight requests on shutdown, in seconds
    #[builder(default = "default_graceful_shutdown_timeout()")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub graceful_shutdown_timeout_secs: u64,
}

fn default_graceful_shutdown_timeout() -> u64 {
    if cfg!(debug_assertions) {
        1 // Debug build: 1 second
    } else {
        30 // Release build: 30 seconds
    }
}

fn validate_store_selector(store: &str) -> Result<(), validator::ValidationError> {
    match store {
        "mem" | "file" | "redis" => Ok(()),
        _ => Err(validator::ValidationError::new("unknown_store")),
    }
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http_host={}, ", self.http_host)?;
        write!(f, "http_port={}, ", self.http_port)?;
        write!(f, "store={}", self.store)?;
        match self.store.as_str() {
            "redis" => write!(f, ", redis_url={}", self.redis_url)?,
            "file" => write!(f, ", file_store_root={}", self.file_store_root)?,
            _ => {}
        }
        write!(
            f,
            ", graceful_shutdown_timeout_secs={}",
            self.graceful_shutdown_timeout_secs
        )
    }
}

impl RuntimeConfig {
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    pub(crate) fn figment() -> Figment {
        layered_figment(RuntimeConfig::default())
    }

    /// Load the runtime configuration from the environment and configuration files
    /// Configuration is prioritized in the following order, where the last has the lowest priority:
    /// 1. Unprefixed well-known variables (`REDIS_URL`)
    /// 2. `NIMKIT_` prefixed environment variables
    /// 3. The TOML file named by `NIMKIT_CONFIG_PATH`
    /// 4. /opt/nimkit/etc/gateway.toml
    /// 5. Built-in defaults
    pub fn from_settings() -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            store: "redis".to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            file_store_root: DEFAULT_FILE_STORE_ROOT.to_string(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout(),
        }
    }
}

impl RuntimeConfigBuilder {
    /// Build and validate the runtime configuration
    pub fn build(&self) -> Result<RuntimeConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

/// Layers the standard NIM Kit configuration sources over `defaults`.
///
/// Shared by every configuration struct in the workspace so that one TOML file and one
/// environment prefix configure the whole process. Unknown keys are ignored on extract.
pub fn layered_figment<T: Serialize>(defaults: T) -> Figment {
    let config_path =
        std::env::var(environment_names::config::NIMKIT_CONFIG_PATH).unwrap_or_default();
    Figment::new()
        .merge(Serialized::defaults(defaults))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed(NIMKIT_ENV_PREFIX).filter_map(|k| {
            let full_key = format!("{NIMKIT_ENV_PREFIX}{}", k.as_str());
            // filters out empty environment variables
            match std::env::var(&full_key) {
                Ok(v) if !v.is_empty() => Some(k.into()),
                _ => None,
            }
        }))
        .merge(Env::raw().filter_map(|k| {
            // well-known unprefixed variables
            let mapped_key = match k.as_str() {
                "REDIS_URL" => "redis_url",
                "NVIDIA_API_KEY" => "nvidia_api_key",
                _ => return None,
            };
            match std::env::var(k.as_str()) {
                Ok(v) if !v.is_empty() => Some(mapped_key.into()),
                _ => None,
            }
        }))
}

/// Check if a string is truthy
/// This will be used to evaluate environment variables or any other subjective
/// configuration parameters that can be set by the user that should be evaluated
/// as a boolean value.
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

pub fn parse_bool(val: &str) -> anyhow::Result<bool> {
    if is_truthy(val) {
        Ok(true)
    } else if is_falsey(val) {
        Ok(false)
    } else {
        anyhow::bail!(
            "Invalid boolean value: '{}'. Expected one of: true/false, 1/0, on/off, yes/no",
            val
        )
    }
}

/// Check if a string is falsey
/// Opposite of [`is_truthy`].
pub fn is_falsey(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "0" | "false" | "off" | "no")
}

/// Check if an environment variable is truthy
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}

/// Check if an environment variable is falsey
pub fn env_is_falsey(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_falsey(val.as_str()),
        Err(_) => false,
    }
}

/// Check whether JSONL logging enabled
/// Set the `NIMKIT_LOGGING_JSONL` environment variable a [`is_truthy`] value
pub fn jsonl_logging_enabled() -> bool {
    env_is_truthy(environment_names::logging::NIMKIT_LOGGING_JSONL)
}

/// Check whether logging with ANSI terminal escape codes and colors is disabled.
pub fn disable_ansi_logging() -> bool {
    env_is_truthy(environment_names::logging::NIMKIT_DISABLE_ANSI_LOGGING)
}

/// Check whether to use local timezone for logging timestamps (default is UTC)
pub fn use_local_timezone() -> bool {
    env_is_truthy(environment_names::logging::NIMKIT_LOG_USE_LOCAL_TZ)
}

#[cfg(test)]
mod tests {
    use super::*;
    use environment_names::{config, store};

    #[test]
    fn test_runtime_config_with_env_vars() -> Result<()> {
        temp_env::with_vars(
            vec![
                (config::NIMKIT_HTTP_HOST, Some("127.0.0.1")),
                (config::NIMKIT_HTTP_PORT, Some("9090")),
                (store::NIMKIT_STORE, Some("mem")),
            ],
            || {
                let config = RuntimeConfig::from_settings()?;
                assert_eq!(config.http_host, "127.0.0.1");
                assert_eq!(config.http_port, 9090);
                assert_eq!(config.store, "mem");
                assert_eq!(config.http_addr(), "127.0.0.1:9090");
                Ok(())
            },
        )
    }

    #[test]
    fn test_runtime_config_defaults() -> Result<()> {
        temp_env::with_vars(
            vec![
                (config::NIMKIT_HTTP_PORT, None::<&str>),
                (config::NIMKIT_HTTP_HOST, Some("")),
                (store::NIMKIT_STORE, None),
                (store::REDIS_URL, None),
            ],
            || {
                let config = RuntimeConfig::from_settings()?;
                let default_config = RuntimeConfig::default();
                assert_eq!(config.http_host, default_config.http_host);
                assert_eq!(config.http_port, default_config.http_port);
                assert_eq!(config.store, "redis");
                assert_eq!(config.redis_url, DEFAULT_REDIS_URL);
                Ok(())
            },
        )
    }

    #[test]
    fn test_unprefixed_redis_url() -> Result<()> {
        temp_env::with_vars(
            vec![(store::REDIS_URL, Some("redis://cache:6380/2"))],
            || {
                let config = RuntimeConfig::from_settings()?;
                assert_eq!(config.redis_url, "redis://cache:6380/2");
                Ok(())
            },
        )
    }

    #[test]
    fn test_config_file_is_layered_under_env() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "http_port = 7000\nstore = \"file\"\n")?;
        let path = path.to_string_lossy().to_string();
        temp_env::with_vars(
            vec![
                (config::NIMKIT_CONFIG_PATH, Some(path.as_str())),
                (config::NIMKIT_HTTP_PORT, None),
                (store::NIMKIT_STORE, Some("mem")),
            ],
            || {
                let config = RuntimeConfig::from_settings()?;
                assert_eq!(config.http_port, 7000);
                assert_eq!(config.store, "mem");
                Ok(())
            },
        )
    }

    #[test]
    fn test_runtime_config_rejects_unknown_store() {
        temp_env::with_vars(vec![(store::NIMKIT_STORE, Some("etcd"))], || {
            let result = RuntimeConfig::from_settings();
            assert!(result.is_err());
            if let Err(e) = result {
                assert!(e.to_string().contains("store"));
            }
        });
    }

    #[test]
    fn test_builder_validates() {
        assert!(RuntimeConfig::builder().store("mem".into()).build().is_ok());
        assert!(
            RuntimeConfig::builder()
                .http_host(String::new())
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_is_truthy_and_falsey() {
        assert!(is_truthy("1"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("yes"));
        assert!(is_falsey("0"));
        assert!(is_falsey("Off"));
        assert!(!is_truthy("0"));
        assert!(!is_falsey("1"));
        assert!(parse_bool("maybe").is_err());

        temp_env::with_vars(vec![("NIMKIT_TEST_TRUTHY", Some("on"))], || {
            assert!(env_is_truthy("NIMKIT_TEST_TRUTHY"));
            assert!(!env_is_falsey("NIMKIT_TEST_TRUTHY"));
        });

        temp_env::with_vars(vec![("NIMKIT_TEST_MISSING", None::<&str>)], || {
            assert!(!env_is_truthy("NIMKIT_TEST_MISSING"));
            assert!(!env_is_falsey("NIMKIT_TEST_MISSING"));
        });
    }
}
