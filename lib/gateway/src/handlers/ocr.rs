// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! PaddleOCR text detection with an annotated copy of the input image.

use std::io::Cursor;
use std::time::Duration;

use ab_glyph::{FontArc, PxScale};
use anyhow::Context;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde_json::{Value, json};

use super::{InferenceContext, InferenceHandler};
use crate::error::{GatewayError, GatewayResult};
use crate::imaging;
use crate::ledger::InferenceRecord;
use crate::upstream::{self, Endpoint, LOCAL_INFER_PATH};

pub const OCR_TIMEOUT: Duration = Duration::from_secs(60);

const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const LABEL_FILL: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_WIDTH: i32 = 3;
const LABEL_OFFSET: i32 = 20;
const LABEL_SCALE: f32 = 12.0;

pub struct PaddleOcr;

#[async_trait]
impl InferenceHandler for PaddleOcr {
    async fn invoke(
        &self,
        ctx: &InferenceContext<'_>,
        record: &mut InferenceRecord,
        payload: &Value,
    ) -> GatewayResult<Value> {
        let image_data_url = payload
            .get("image_data_url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                GatewayError::validation("image_data_url is required for PaddleOCR inference")
            })?;

        // the invoke URL is a base here, both variants get /v1/infer
        let base = upstream::base_url(&ctx.nim.config, &ctx.nim.entry, ctx.use_cloud)?;
        let endpoint = Endpoint {
            url: format!("{base}{LOCAL_INFER_PATH}"),
            api_key: ctx.api_key().await?,
        };
        let request = json!({"input": [{"type": "image_url", "url": image_data_url}]});
        let mut output = ctx.post(record, &endpoint, &request, OCR_TIMEOUT).await?;

        if has_detections(&output) {
            let path = ctx.state.media().ocr_visualization_path(&record.request_id);
            match visualize(image_data_url, &output, ctx.state.font()).await {
                Ok(Some(png)) => match ctx.state.media().write(&path, &png).await {
                    Ok(()) => {
                        tracing::info!(request_id = %record.request_id, path = %path.display(), "saved OCR visualization");
                        output["visualization_path"] = json!(path.display().to_string());
                    }
                    Err(err) => {
                        tracing::warn!(request_id = %record.request_id, "failed to save OCR visualization: {err:#}")
                    }
                },
                Ok(None) => {
                    tracing::info!(request_id = %record.request_id, "image is not a data URL, skipping OCR visualization")
                }
                Err(err) => {
                    tracing::warn!(request_id = %record.request_id, "failed to create OCR visualization: {err:#}")
                }
            }
        }

        ctx.state.ledger().complete(record, &output).await?;
        Ok(output)
    }
}

fn has_detections(output: &Value) -> bool {
    output
        .get("data")
        .and_then(Value::as_array)
        .is_some_and(|data| !data.is_empty())
}

/// PNG of the input with detections drawn. `None` when the input is a remote URL.
async fn visualize(
    image_data_url: &str,
    output: &Value,
    font: Option<&FontArc>,
) -> anyhow::Result<Option<Vec<u8>>> {
    if !image_data_url.starts_with("data:") {
        return Ok(None);
    }
    let image_data_url = image_data_url.to_string();
    let output = output.clone();
    let font = font.cloned();
    let png = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let image = imaging::decode_data_url(&image_data_url).context("Failed to decode OCR input")?;
        let mut canvas = image.to_rgb8();
        let drawn = annotate(&mut canvas, &output, font.as_ref());
        tracing::debug!(detections = drawn, "drew text detections");

        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut buffer, ImageFormat::Png)
            .context("Failed to encode OCR visualization")?;
        Ok(buffer.into_inner())
    })
    .await
    .context("OCR visualization task panicked")??;
    Ok(Some(png))
}

/// Pixel bounds of a detection's normalized `bounding_box.points`
fn bounds(detection: &Value, width: u32, height: u32) -> Option<(i32, i32, i32, i32)> {
    let points = detection
        .get("bounding_box")
        .and_then(|b| b.get("points"))
        .and_then(Value::as_array)?;
    if points.len() < 4 {
        return None;
    }
    let coord = |point: &Value, axis: &str| point.get(axis).and_then(Value::as_f64).unwrap_or(0.0);
    let xs: Vec<f64> = points.iter().map(|p| coord(p, "x")).collect();
    let ys: Vec<f64> = points.iter().map(|p| coord(p, "y")).collect();
    let min = |v: &[f64]| v.iter().copied().fold(f64::INFINITY, f64::min);
    let max = |v: &[f64]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((
        (min(xs.as_slice()) * width as f64) as i32,
        (min(ys.as_slice()) * height as f64) as i32,
        (max(xs.as_slice()) * width as f64) as i32,
        (max(ys.as_slice()) * height as f64) as i32,
    ))
}

/// Draws every `data[].text_detections[]` and returns how many were drawn
fn annotate(canvas: &mut RgbImage, output: &Value, font: Option<&FontArc>) -> usize {
    let (width, height) = canvas.dimensions();
    let detections = output
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("text_detections").and_then(Value::as_array))
        .flatten();

    let mut drawn = 0;
    for (index, detection) in detections.enumerate() {
        let Some((x_min, y_min, x_max, y_max)) = bounds(detection, width, height) else {
            tracing::warn!(detection = index + 1, "invalid bounding box");
            continue;
        };
        for inset in 0..BOX_WIDTH {
            let w = (x_max - x_min - 2 * inset + 1).max(1) as u32;
            let h = (y_max - y_min - 2 * inset + 1).max(1) as u32;
            draw_hollow_rect_mut(canvas, Rect::at(x_min + inset, y_min + inset).of_size(w, h), BOX_COLOR);
        }

        let prediction = detection.get("text_prediction");
        let text = prediction
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let confidence = prediction
            .and_then(|p| p.get("confidence"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let label = format!("{text}: {confidence:.2}");

        let label_y = y_min - LABEL_OFFSET;
        let (label_w, label_h) = match font {
            Some(font) => text_size(PxScale::from(LABEL_SCALE), font, &label),
            None => (label.chars().count() as u32 * 6, LABEL_SCALE as u32),
        };
        let label_rect = Rect::at(x_min, label_y).of_size(label_w.max(1), label_h.max(1));
        draw_filled_rect_mut(canvas, label_rect, LABEL_FILL);
        draw_hollow_rect_mut(canvas, label_rect, BOX_COLOR);
        if let Some(font) = font {
            draw_text_mut(canvas, BOX_COLOR, x_min, label_y, PxScale::from(LABEL_SCALE), font, &label);
        }
        drawn += 1;
    }
    drawn
}
