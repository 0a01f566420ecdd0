// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the gateway.
//!
//! Each module contributes a router built by a function returning
//! `(Vec<RouteDoc>, Router)`. [`HttpService`] merges them, adds CORS and the
//! JSON error rewriting, and exposes the route list for startup logging.
//!
//! Every error body has the shape `{"detail": "..."}`. Extractor rejections,
//! which axum reports as plain text, are rewritten into that shape with status
//! 400 by [`json_error_middleware`].

pub mod catalog;
pub mod gallery;
pub mod health;
pub mod image_conversion;
pub mod inference;
pub mod llm;
pub mod metrics;
pub mod metrics_query;
pub mod nims;
pub mod nvidia;

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use tower_http::cors::CorsLayer;

use crate::error::GatewayError;
use crate::state::AppState;

/// Rejection bodies are short, anything larger is passed through untouched
const REJECTION_BODY_LIMIT: usize = 64 * 1024;

/// Documentation for a route
#[derive(Debug, Clone)]
pub struct RouteDoc {
    method: axum::http::Method,
    path: String,
}

impl std::fmt::Display for RouteDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

impl RouteDoc {
    pub fn new<T: Into<String>>(method: axum::http::Method, path: T) -> Self {
        RouteDoc {
            method,
            path: path.into(),
        }
    }
}

/// Converts non-JSON 400/415/422 responses (extractor rejections) into a
/// 400 `{"detail"}` body
pub async fn json_error_middleware(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;

    let status = response.status();
    let rejected = matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY
    );
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !rejected || is_json {
        return response;
    }

    let (_parts, body) = response.into_parts();
    let body_bytes = axum::body::to_bytes(body, REJECTION_BODY_LIMIT)
        .await
        .unwrap_or_default();
    let message = String::from_utf8_lossy(&body_bytes).trim().to_string();
    tracing::debug!(status = status.as_u16(), %message, "request rejected");
    GatewayError::validation(message).into_response()
}

/// The assembled gateway router
pub struct HttpService {
    router: Router,
    route_docs: Vec<RouteDoc>,
}

impl HttpService {
    /// Builds every router over `state` and registers the request metrics
    pub fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let registry = metrics::Registry::new();
        state.metrics_clone().register(&registry)?;

        let mut all_docs = Vec::new();
        let mut router = Router::new();
        let routes = vec![
            health::health_router(state.clone(), None),
            catalog::catalog_router(state.clone(), None),
            nims::nims_router(state.clone(), None),
            inference::inference_router(state.clone(), None),
            inference::asr_router(state.clone(), None),
            inference::speech_enhancement_router(state.clone(), None),
            llm::llm_router(state.clone(), None),
            gallery::gallery_router(state.clone(), None),
            image_conversion::image_conversion_router(None),
            nvidia::nvidia_router(state.clone(), None),
            metrics_query::metrics_query_router(state.clone(), None),
            metrics::router(registry, None),
        ];
        for (docs, route) in routes {
            all_docs.extend(docs);
            router = router.merge(route);
        }

        let router = router
            .layer(middleware::from_fn(json_error_middleware))
            .layer(CorsLayer::permissive());

        Ok(HttpService {
            router,
            route_docs: all_docs,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn route_docs(&self) -> &[RouteDoc] {
        &self.route_docs
    }
}
