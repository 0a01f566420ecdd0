// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Static descriptive metadata for known NIMs, loaded once from a YAML list.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::nim_type::NimType;

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub nim_type: Option<NimType>,

    /// Cloud endpoint of the hosted variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_url: Option<String>,

    /// name, description, publisher, tags and anything else, returned as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogEntry {
    /// The declared type, or `None` when the entry leaves it blank
    pub fn declared_type(&self) -> Option<&NimType> {
        self.nim_type
            .as_ref()
            .filter(|t| !t.as_str().trim().is_empty())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Catalog { entries }
    }

    /// Reads the catalog at `path`. A missing file is an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "catalog file not found, no NIMs will resolve");
                return Ok(Catalog::default());
            }
            Err(source) => {
                return Err(CatalogError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let catalog = Self::from_yaml(&text)?;
        tracing::info!(path = %path.display(), count = catalog.len(), "loaded NIM catalog");
        Ok(catalog)
    }

    pub fn from_yaml(text: &str) -> Result<Self, CatalogError> {
        let entries: Option<Vec<CatalogEntry>> = serde_yaml::from_str(text)?;
        Ok(Catalog::new(entries.unwrap_or_default()))
    }

    pub fn get(&self, nim_id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == nim_id)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
