// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use axum::{Json, Router, http::Method, routing::post};
use serde::{Deserialize, Serialize};

use super::RouteDoc;
use crate::error::{GatewayError, GatewayResult};
use crate::imaging::{self, CannyParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConversionType {
    Canny,
    Depth,
}

fn default_lower() -> f64 {
    CannyParams::default().lower
}

fn default_upper() -> f64 {
    CannyParams::default().upper
}

fn default_kernel() -> u32 {
    CannyParams::default().blur_kernel_size
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversionRequest {
    pub image_data: String,
    pub conversion_type: String,
    #[serde(default = "default_lower")]
    pub canny_lower_threshold: f64,
    #[serde(default = "default_upper")]
    pub canny_upper_threshold: f64,
    #[serde(default = "default_kernel")]
    pub canny_blur_kernel_size: u32,
    #[serde(default)]
    pub canny_blur_sigma: f64,
}

impl ConversionRequest {
    fn canny_params(&self) -> CannyParams {
        CannyParams {
            lower: self.canny_lower_threshold,
            upper: self.canny_upper_threshold,
            blur_kernel_size: self.canny_blur_kernel_size,
            blur_sigma: self.canny_blur_sigma,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionResponse {
    pub converted_image_data: String,
    pub original_dimensions: Dimensions,
    pub converted_dimensions: Dimensions,
}

/// Stateless, so no `AppState`
pub fn image_conversion_router(path: Option<String>) -> (Vec<RouteDoc>, Router) {
    let path = path.unwrap_or_else(|| "/v0/image-conversion/convert".to_string());
    let doc = RouteDoc::new(Method::POST, &path);
    let router = Router::new().route(&path, post(convert_handler));
    (vec![doc], router)
}

async fn convert_handler(
    Json(request): Json<ConversionRequest>,
) -> GatewayResult<Json<ConversionResponse>> {
    let conversion_type: ConversionType = request
        .conversion_type
        .parse()
        .map_err(|_| GatewayError::validation("Conversion type must be 'canny' or 'depth'"))?;
    if conversion_type == ConversionType::Depth {
        return Err(GatewayError::validation(
            "Depth conversion is not available in this deployment",
        ));
    }

    request
        .canny_params()
        .validate()
        .map_err(|err| GatewayError::validation(err.to_string()))?;

    // decoding and edge detection are CPU bound
    let response = tokio::task::spawn_blocking(move || convert(&request))
        .await
        .map_err(|err| GatewayError::internal(format!("Image conversion failed: {err}")))??;
    Ok(Json(response))
}

fn convert(request: &ConversionRequest) -> GatewayResult<ConversionResponse> {
    let image = imaging::decode_data_url(&request.image_data)
        .map_err(|err| GatewayError::validation(format!("Failed to decode image: {err}")))?;
    let original_dimensions = Dimensions {
        width: image.width(),
        height: image.height(),
    };
    tracing::debug!(
        width = original_dimensions.width,
        height = original_dimensions.height,
        "converting image to canny edges"
    );

    let edges = imaging::canny(&image, &request.canny_params());
    let converted_image_data = imaging::encode_jpeg_data_url(&edges)
        .map_err(|err| GatewayError::internal(format!("Failed to encode image: {err}")))?;
    Ok(ConversionResponse {
        converted_image_data,
        original_dimensions,
        converted_dimensions: Dimensions {
            width: edges.width(),
            height: edges.height(),
        },
    })
}
