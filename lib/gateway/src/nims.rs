// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Routing configuration of each NIM: where it listens and what kind it is.
//!
//! Records live in the `nim` bucket keyed by NIM id, so on Redis the record for
//! `meta/llama-3_1-8b-instruct` is the JSON string at `nim:meta/llama-3_1-8b-instruct`.

use nimkit_runtime::storage::key_value_store::{Key, Manager, StoreError};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::nim_type::NimType;

pub const NIM_BUCKET: &str = "nim";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NimConfig {
    pub nim_id: String,
    pub host: String,
    pub port: u16,
    pub nim_type: NimType,
}

impl NimConfig {
    /// `http://host:port`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Body of a config create or replace. The port is range-checked here rather
/// than by the integer type so that out-of-range values get a readable error.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NimConfigRequest {
    #[validate(length(min = 1, message = "host must not be empty"))]
    pub host: String,
    #[validate(range(min = 1, max = 65535, message = "port must be between 1 and 65535"))]
    pub port: i64,
    pub nim_type: NimType,
}

impl NimConfigRequest {
    /// Validated record for `nim_id`
    pub fn into_config(self, nim_id: &str) -> Result<NimConfig, validator::ValidationErrors> {
        self.validate()?;
        let port = u16::try_from(self.port).map_err(|_| {
            let mut errors = validator::ValidationErrors::new();
            errors.add("port", validator::ValidationError::new("range"));
            errors
        })?;
        Ok(NimConfig {
            nim_id: nim_id.to_string(),
            host: self.host.trim().to_string(),
            port,
            nim_type: self.nim_type,
        })
    }
}

/// CRUD over NIM routing records
#[derive(Clone)]
pub struct NimStore {
    manager: Manager,
}

impl NimStore {
    pub fn new(manager: Manager) -> Self {
        NimStore { manager }
    }

    pub async fn get(&self, nim_id: &str) -> Result<Option<NimConfig>, StoreError> {
        self.manager.load(NIM_BUCKET, &Key::from(nim_id)).await
    }

    pub async fn put(&self, config: &NimConfig) -> Result<(), StoreError> {
        let outcome = self
            .manager
            .save(NIM_BUCKET, &Key::new(config.nim_id.clone()), config)
            .await?;
        tracing::info!(
            nim_id = %config.nim_id,
            host = %config.host,
            port = config.port,
            nim_type = %config.nim_type,
            %outcome,
            "stored NIM config"
        );
        Ok(())
    }

    /// Returns whether the record existed
    pub async fn delete(&self, nim_id: &str) -> Result<bool, StoreError> {
        let bucket = self.manager.get_or_create_bucket(NIM_BUCKET).await?;
        bucket.delete(&Key::from(nim_id)).await
    }

    /// Every configured NIM id, sorted
    pub async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let bucket = self.manager.get_or_create_bucket(NIM_BUCKET).await?;
        let mut ids: Vec<String> = bucket
            .keys()
            .await?
            .iter()
            .map(String::from)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// First configured NIM of the given type, in id order.
    /// Records that fail to decode are skipped.
    pub async fn first_of_type(&self, nim_type: &NimType) -> Result<Option<NimConfig>, StoreError> {
        for nim_id in self.list_ids().await? {
            match self.get(&nim_id).await {
                Ok(Some(config)) if &config.nim_type == nim_type => return Ok(Some(config)),
                Ok(_) => {}
                Err(err) => tracing::warn!(%nim_id, %err, "skipping unreadable NIM config"),
            }
        }
        Ok(None)
    }
}
