// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NVIDIA cloud API key and the switch that routes inference to the cloud.
//!
//! Both are plain strings in the `nims` bucket (`nims:nvidia_api_key` and
//! `nims:nvidia_api_toggle` on Redis). A stored key wins over the one from the
//! environment.

use nimkit_runtime::storage::key_value_store::{Key, Manager, StoreError};
use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};

pub const SETTINGS_BUCKET: &str = "nims";
const API_KEY: &str = "nvidia_api_key";
const TOGGLE_KEY: &str = "nvidia_api_toggle";
const KEY_PREFIX: &str = "nvapi-";
const NO_KEY_PREVIEW: &str = "No API key configured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum KeySource {
    Redis,
    Environment,
    None,
}

#[derive(Clone)]
pub struct ApiKeys {
    manager: Manager,
    env_key: Option<String>,
}

impl ApiKeys {
    pub fn new(manager: Manager, env_key: Option<String>) -> Self {
        let env_key = env_key.filter(|k| !k.trim().is_empty());
        ApiKeys { manager, env_key }
    }

    async fn stored(&self, key: &str) -> Result<Option<String>, StoreError> {
        let bucket = self.manager.get_or_create_bucket(SETTINGS_BUCKET).await?;
        Ok(bucket
            .get(&Key::from(key))
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    /// The key to use for cloud calls and where it came from
    pub async fn resolve(&self) -> Result<(Option<String>, KeySource), StoreError> {
        if let Some(key) = self.stored(API_KEY).await? {
            return Ok((Some(key), KeySource::Redis));
        }
        match &self.env_key {
            Some(key) => Ok((Some(key.clone()), KeySource::Environment)),
            None => Ok((None, KeySource::None)),
        }
    }

    pub async fn key(&self) -> Result<Option<String>, StoreError> {
        Ok(self.resolve().await?.0)
    }

    /// Validates and stores `api_key`, returning its preview
    pub async fn set(&self, api_key: &str) -> GatewayResult<String> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(GatewayError::validation("API key is required"));
        }
        if !api_key.starts_with(KEY_PREFIX) {
            return Err(GatewayError::validation(format!(
                "API key must start with '{KEY_PREFIX}'"
            )));
        }
        let bucket = self.manager.get_or_create_bucket(SETTINGS_BUCKET).await?;
        bucket
            .insert(&Key::from(API_KEY), api_key.to_string().into())
            .await?;
        tracing::info!("stored NVIDIA API key");
        Ok(preview(Some(api_key)))
    }

    pub async fn delete(&self) -> Result<bool, StoreError> {
        let bucket = self.manager.get_or_create_bucket(SETTINGS_BUCKET).await?;
        bucket.delete(&Key::from(API_KEY)).await
    }

    /// Whether cloud routing is switched on. Always off without a key.
    pub async fn toggle(&self) -> Result<bool, StoreError> {
        if self.key().await?.is_none() {
            return Ok(false);
        }
        Ok(self.stored(TOGGLE_KEY).await?.as_deref() == Some("true"))
    }

    pub async fn set_toggle(&self, enabled: bool) -> GatewayResult<()> {
        if self.key().await?.is_none() {
            return Err(GatewayError::validation(
                "Cannot enable NVIDIA API without a configured API key",
            ));
        }
        let bucket = self.manager.get_or_create_bucket(SETTINGS_BUCKET).await?;
        bucket
            .insert(&Key::from(TOGGLE_KEY), enabled.to_string().into())
            .await?;
        Ok(())
    }
}

/// First ten characters and an ellipsis
pub fn preview(key: Option<&str>) -> String {
    match key {
        Some(key) => format!("{}...", key.chars().take(10).collect::<String>()),
        None => NO_KEY_PREVIEW.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stored_key_wins_over_environment() -> anyhow::Result<()> {
        let keys = ApiKeys::new(Manager::memory(), Some("nvapi-from-env".into()));
        assert_eq!(
            keys.resolve().await?,
            (Some("nvapi-from-env".to_string()), KeySource::Environment)
        );

        let shown = keys.set("  nvapi-stored-key-123 ").await?;
        assert_eq!(shown, "nvapi-stor...");
        assert_eq!(
            keys.resolve().await?,
            (Some("nvapi-stored-key-123".to_string()), KeySource::Redis)
        );

        assert!(keys.delete().await?);
        assert_eq!(keys.resolve().await?.1, KeySource::Environment);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_validation() -> anyhow::Result<()> {
        let keys = ApiKeys::new(Manager::memory(), None);
        let err = keys.set("   ").await.unwrap_err();
        assert_eq!(err.to_string(), "API key is required");
        let err = keys.set("sk-123").await.unwrap_err();
        assert_eq!(err.to_string(), "API key must start with 'nvapi-'");
        assert_eq!(keys.resolve().await?, (None, KeySource::None));
        Ok(())
    }

    #[tokio::test]
    async fn test_toggle_needs_key() -> anyhow::Result<()> {
        let keys = ApiKeys::new(Manager::memory(), Some(String::new()));
        assert!(!keys.toggle().await?);
        assert!(keys.set_toggle(true).await.is_err());

        keys.set("nvapi-abc").await?;
        keys.set_toggle(true).await?;
        assert!(keys.toggle().await?);

        // removing the key turns the switch off without touching it
        keys.delete().await?;
        assert!(!keys.toggle().await?);
        Ok(())
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview(None), "No API key configured");
        assert_eq!(preview(Some("nvapi")), "nvapi...");
    }
}
