// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, http::StatusCode, response::IntoResponse};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::logging::make_request_span;

/// HTTP server information containing socket address and handle
#[derive(Debug, Clone)]
pub struct HttpServerInfo {
    pub socket_addr: SocketAddr,
    pub handle: Arc<JoinHandle<()>>,
}

impl HttpServerInfo {
    pub fn address(&self) -> String {
        self.socket_addr.to_string()
    }

    pub fn hostname(&self) -> String {
        self.socket_addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.socket_addr.port()
    }
}

/// Bind `host:port` and serve `app` in the background until `cancel_token` fires.
///
/// Adds a JSON 404 fallback and request tracing on top of the given router.
/// Port 0 binds a random free port, the chosen address is in the returned info.
pub async fn spawn_http_server(
    host: &str,
    port: u16,
    app: Router,
    cancel_token: CancellationToken,
) -> anyhow::Result<HttpServerInfo> {
    let app = app
        .fallback(|| async {
            tracing::debug!("[fallback handler] called");
            (
                StatusCode::NOT_FOUND,
                axum::Json(serde_json::json!({"detail": "Not Found"})),
            )
                .into_response()
        })
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span));

    let address = format!("{}:{}", host, port);
    tracing::info!("[spawn_http_server] binding to: {}", address);

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to address {}: {}", address, e);
            return Err(anyhow::anyhow!("Failed to bind to address: {}", e));
        }
    };
    let actual_address = listener.local_addr()?;
    tracing::info!(
        "[spawn_http_server] http server bound to: {}",
        actual_address
    );

    let observer = cancel_token.child_token();
    // Spawn the server in the background and return the handle
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(observer.cancelled_owned())
            .await
        {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    Ok(HttpServerInfo {
        socket_addr: actual_address,
        handle: Arc::new(handle),
    })
}
