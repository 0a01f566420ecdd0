// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Paged browsing of past inference requests.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::Method,
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::RouteDoc;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::RecordFilter;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct GalleryParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub search: Option<String>,
    /// Comma separated
    pub nim_ids: Option<String>,
}

impl GalleryParams {
    fn limit(&self) -> GatewayResult<usize> {
        match self.limit {
            None => Ok(DEFAULT_PAGE_SIZE),
            Some(limit) if (1..=MAX_PAGE_SIZE).contains(&limit) => Ok(limit),
            Some(_) => Err(GatewayError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            ))),
        }
    }

    fn nim_ids(&self) -> Vec<String> {
        self.nim_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pagination {
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Pagination {
    /// `limit` is at least 1
    pub fn new(total_count: usize, limit: usize, offset: usize) -> Self {
        Pagination {
            total_count,
            limit,
            offset,
            current_page: (offset / limit).saturating_add(1),
            total_pages: total_count.div_ceil(limit),
            has_next: offset.saturating_add(limit) < total_count,
            has_previous: offset > 0,
        }
    }
}

pub fn gallery_router(state: Arc<AppState>, path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/api/gallery/inference-requests".to_string());
    let doc = RouteDoc::new(Method::GET, &path);
    let router = Router::new()
        .route(&path, get(list_gallery))
        .with_state(state);
    (vec![doc], router)
}

async fn list_gallery(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GalleryParams>,
) -> GatewayResult<Json<Value>> {
    let limit = params.limit()?;
    let offset = params.offset.unwrap_or(0);
    let filter = RecordFilter {
        nim_ids: params.nim_ids(),
        search: params.search.clone(),
        ..Default::default()
    };

    let page = state.ledger().list(&filter, offset, limit).await?;
    tracing::debug!(total = page.total, returned = page.records.len(), "gallery query");

    let results: Vec<Value> = page.records.iter().map(|r| r.to_gallery_json()).collect();
    Ok(Json(json!({
        "results": results,
        "pagination": Pagination::new(page.total, limit, offset),
        "filters": {
            "search": params.search,
            "nim_ids": params.nim_ids,
        },
        "status": "success",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(25, 10, 0, 1, 3, true, false)]
    #[case(25, 10, 20, 3, 3, false, true)]
    #[case(20, 10, 10, 2, 2, false, true)]
    #[case(0, 10, 0, 1, 0, false, false)]
    #[case(5, 2, 3, 2, 3, false, true)]
    #[case(3, 10, usize::MAX, usize::MAX / 10 + 1, 1, false, true)]
    #[case(3, 1, usize::MAX, usize::MAX, 3, false, true)]
    fn test_pagination(
        #[case] total: usize,
        #[case] limit: usize,
        #[case] offset: usize,
        #[case] current_page: usize,
        #[case] total_pages: usize,
        #[case] has_next: bool,
        #[case] has_previous: bool,
    ) {
        let page = Pagination::new(total, limit, offset);
        assert_eq!(page.current_page, current_page);
        assert_eq!(page.total_pages, total_pages);
        assert_eq!(page.has_next, has_next);
        assert_eq!(page.has_previous, has_previous);
    }

    #[test]
    fn test_params() {
        let params = GalleryParams {
            limit: Some(101),
            nim_ids: Some(" a/b, ,c/d ".into()),
            ..Default::default()
        };
        assert!(params.limit().is_err());
        assert_eq!(params.nim_ids(), vec!["a/b".to_string(), "c/d".to_string()]);
        assert_eq!(GalleryParams::default().limit().unwrap(), 10);
        assert!(GalleryParams::default().nim_ids().is_empty());
    }
}
