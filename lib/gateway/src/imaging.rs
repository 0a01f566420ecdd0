// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Image data URLs and the canny edge conversion.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage};

const JPEG_QUALITY: u8 = 90;

/// Largest accepted blur kernel, in taps
pub const MAX_BLUR_KERNEL_SIZE: u32 = 31;

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("{0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    InvalidParams(String),
}

/// Raw bytes of a base64 image. A `data:...;base64,` prefix is dropped.
pub fn decode_data_url_bytes(data: &str) -> Result<Vec<u8>, ImagingError> {
    let payload = match data.trim().split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data.trim(),
    };
    Ok(STANDARD.decode(payload.trim())?)
}

pub fn decode_data_url(data: &str) -> Result<DynamicImage, ImagingError> {
    let bytes = decode_data_url_bytes(data)?;
    Ok(image::load_from_memory(&bytes)?)
}

/// `data:image/jpeg;base64,...` at quality 90
pub fn encode_jpeg_data_url(image: &RgbImage) -> Result<String, ImagingError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY))?;
    Ok(format!(
        "data:image/jpeg;base64,{}",
        STANDARD.encode(buffer.into_inner())
    ))
}

/// Parameters of [`canny`]. Thresholds are multipliers of the median intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CannyParams {
    pub lower: f64,
    pub upper: f64,
    pub blur_kernel_size: u32,
    /// 0 derives sigma from the kernel size
    pub blur_sigma: f64,
}

impl Default for CannyParams {
    fn default() -> Self {
        CannyParams {
            lower: 0.7,
            upper: 1.3,
            blur_kernel_size: 5,
            blur_sigma: 0.0,
        }
    }
}

impl CannyParams {
    pub fn validate(&self) -> Result<(), ImagingError> {
        if self.blur_kernel_size > MAX_BLUR_KERNEL_SIZE {
            return Err(ImagingError::InvalidParams(format!(
                "Blur kernel size must be at most {MAX_BLUR_KERNEL_SIZE}"
            )));
        }
        if !self.blur_sigma.is_finite() || self.blur_sigma < 0.0 {
            return Err(ImagingError::InvalidParams(
                "Blur sigma must be a finite number >= 0".to_string(),
            ));
        }
        for threshold in [self.lower, self.upper] {
            if !threshold.is_finite() {
                return Err(ImagingError::InvalidParams(
                    "Canny thresholds must be finite numbers".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Kernel size bumped to the next odd number, within 1..=[`MAX_BLUR_KERNEL_SIZE`]
    pub fn kernel_size(&self) -> u32 {
        let size = self.blur_kernel_size.clamp(1, MAX_BLUR_KERNEL_SIZE);
        if size % 2 == 0 { size + 1 } else { size }
    }

    pub fn sigma(&self) -> f32 {
        if self.blur_sigma > 0.0 {
            return self.blur_sigma as f32;
        }
        let k = self.kernel_size() as f64;
        (0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8) as f32
    }

    /// Hysteresis thresholds around `median`
    pub fn thresholds(&self, median: f64) -> (f32, f32) {
        let lower = (self.lower * median).max(0.0).trunc();
        let upper = (self.upper * median).min(255.0).trunc();
        (lower as f32, upper as f32)
    }
}

/// Median intensity. With an even pixel count the two middle values are averaged.
pub fn median(image: &GrayImage) -> f64 {
    let mut histogram = [0usize; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }
    let total: usize = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let nth = |n: usize| -> f64 {
        let mut seen = 0;
        for (value, count) in histogram.iter().enumerate() {
            seen += count;
            if seen > n {
                return value as f64;
            }
        }
        255.0
    };
    if total % 2 == 1 {
        nth(total / 2)
    } else {
        (nth(total / 2 - 1) + nth(total / 2)) / 2.0
    }
}

/// Normalized 1-D Gaussian of exactly `size` taps
pub fn gaussian_kernel(size: u32, sigma: f32) -> Vec<f32> {
    let center = (size / 2) as f32;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Gaussian blur with the kernel size and sigma of `params`
pub fn blur(gray: &GrayImage, params: &CannyParams) -> GrayImage {
    let kernel = gaussian_kernel(params.kernel_size(), params.sigma());
    imageproc::filter::separable_filter_equal(gray, &kernel)
}

/// Grayscale, blur, edges with median-relative thresholds, back to 3 channels
pub fn canny(image: &DynamicImage, params: &CannyParams) -> RgbImage {
    let gray = image.to_luma8();
    let blurred = blur(&gray, params);
    let (lower, upper) = params.thresholds(median(&blurred));
    tracing::debug!(lower, upper, sigma = params.sigma(), "canny thresholds");
    let edges = imageproc::edges::canny(&blurred, lower, upper);
    DynamicImage::ImageLuma8(edges).to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use rstest::rstest;

    fn sample_png() -> anyhow::Result<String> {
        let mut img = RgbImage::from_pixel(40, 30, Rgb([20, 20, 20]));
        for y in 10..20 {
            for x in 10..30 {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png)?;
        Ok(format!(
            "data:image/png;base64,{}",
            STANDARD.encode(buffer.into_inner())
        ))
    }

    #[rstest]
    #[case(5, 5)]
    #[case(4, 5)]
    #[case(1, 1)]
    #[case(0, 1)]
    #[case(1000, MAX_BLUR_KERNEL_SIZE)]
    fn test_kernel_size_is_odd(#[case] requested: u32, #[case] expected: u32) {
        let params = CannyParams {
            blur_kernel_size: requested,
            ..Default::default()
        };
        assert_eq!(params.kernel_size(), expected);
    }

    #[test]
    fn test_auto_sigma() {
        let params = CannyParams::default();
        assert!((params.sigma() - 1.1).abs() < 1e-6);
        let params = CannyParams {
            blur_sigma: 2.5,
            ..Default::default()
        };
        assert_eq!(params.sigma(), 2.5);
    }

    #[rstest]
    #[case(CannyParams { blur_kernel_size: MAX_BLUR_KERNEL_SIZE + 1, ..Default::default() })]
    #[case(CannyParams { blur_sigma: 1e9_f64.powi(40), ..Default::default() })]
    #[case(CannyParams { blur_sigma: -1.0, ..Default::default() })]
    #[case(CannyParams { blur_sigma: f64::NAN, ..Default::default() })]
    #[case(CannyParams { lower: f64::INFINITY, ..Default::default() })]
    fn test_rejected_params(#[case] params: CannyParams) {
        assert!(matches!(params.validate(), Err(ImagingError::InvalidParams(_))));
    }

    #[test]
    fn test_large_sigma_keeps_kernel_size() {
        let params = CannyParams {
            blur_kernel_size: 7,
            blur_sigma: 1e9,
            ..Default::default()
        };
        assert!(params.validate().is_ok());
        let kernel = gaussian_kernel(params.kernel_size(), params.sigma());
        assert_eq!(kernel.len(), 7);
        assert!(kernel.iter().all(|w| (w - 1.0 / 7.0).abs() < 1e-6));
    }

    #[test]
    fn test_gaussian_kernel() {
        let kernel = gaussian_kernel(5, 1.1);
        assert_eq!(kernel.len(), 5);
        assert!((kernel.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert_eq!(kernel[0], kernel[4]);
        assert!(kernel[2] > kernel[1] && kernel[1] > kernel[0]);
        assert_eq!(gaussian_kernel(1, 0.5), vec![1.0]);
    }

    #[test]
    fn test_blur_follows_kernel_size() {
        let mut gray = GrayImage::from_pixel(21, 21, Luma([0]));
        gray.put_pixel(10, 10, Luma([255]));
        let with_size = |size| {
            blur(
                &gray,
                &CannyParams {
                    blur_kernel_size: size,
                    blur_sigma: 3.0,
                    ..Default::default()
                },
            )
        };

        let identity = with_size(1);
        assert_eq!(identity, gray);

        let narrow = with_size(3);
        let wide = with_size(9);
        assert_ne!(narrow, wide);
        // a 3-tap kernel cannot spread the impulse further than one pixel
        assert_eq!(narrow.get_pixel(13, 10).0[0], 0);
        assert!(wide.get_pixel(13, 10).0[0] > 0);
    }

    #[test]
    fn test_thresholds_are_clamped() {
        let params = CannyParams::default();
        assert_eq!(params.thresholds(100.0), (70.0, 130.0));
        assert_eq!(params.thresholds(250.0), (175.0, 255.0));
    }

    #[test]
    fn test_median() {
        let mut img = GrayImage::new(2, 2);
        img.put_pixel(0, 0, Luma([10]));
        img.put_pixel(1, 0, Luma([20]));
        img.put_pixel(0, 1, Luma([30]));
        img.put_pixel(1, 1, Luma([200]));
        assert_eq!(median(&img), 25.0);
        assert_eq!(median(&GrayImage::from_pixel(3, 1, Luma([7]))), 7.0);
    }

    #[test]
    fn test_canny_keeps_dimensions() -> anyhow::Result<()> {
        let image = decode_data_url(&sample_png()?)?;
        let edges = canny(&image, &CannyParams::default());
        assert_eq!(edges.dimensions(), (40, 30));

        let url = encode_jpeg_data_url(&edges)?;
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let reloaded = decode_data_url(&url)?;
        assert_eq!((reloaded.width(), reloaded.height()), (40, 30));
        Ok(())
    }

    #[test]
    fn test_decode_without_prefix_and_garbage() -> anyhow::Result<()> {
        let url = sample_png()?;
        let (_, raw) = url.split_once(',').unwrap();
        assert_eq!(decode_data_url(raw)?.width(), 40);
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
        assert!(decode_data_url(&STANDARD.encode(b"not an image")).is_err());
        Ok(())
    }
}
