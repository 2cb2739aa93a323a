//! JPEG encoding of raster tiles.
//!
//! Derived images keep the source's sample type (16-bit, float, ...), which
//! JPEG cannot hold. Tiles are therefore brought down to 8 bits first:
//!
//! - **8-bit unsigned**: samples are used as they are.
//! - **Anything else**: a min/max stretch over the tile maps the darkest
//!   sample to 0 and the brightest to 255. A flat tile becomes black.
//!
//! One sample per pixel is encoded as grayscale, three as RGB, four as RGB
//! with the fourth sample dropped. Other counts show the first sample only.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage};

use crate::convert::raster::Raster;
use crate::error::TileError;
use crate::format::tiff::SampleFormat;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Encoder turning raster tiles into JPEG previews.
#[derive(Debug, Clone, Default)]
pub struct JpegTileEncoder {}

impl JpegTileEncoder {
    /// Create a new JPEG tile encoder.
    pub fn new() -> Self {
        Self {}
    }

    /// Encode `raster` at the given quality (clamped to 1-100).
    pub fn encode(&self, raster: &Raster, quality: u8) -> Result<Bytes, TileError> {
        let quality = clamp_quality(quality);
        let img = to_dynamic_image(raster)?;

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder
            .encode_image(&img)
            .map_err(|e| TileError::EncodeError {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }

    /// Encode at the default quality.
    pub fn encode_default(&self, raster: &Raster) -> Result<Bytes, TileError> {
        self.encode(raster, DEFAULT_JPEG_QUALITY)
    }
}

/// Samples of the channels that end up in the JPEG, as 8-bit values.
fn to_dynamic_image(raster: &Raster) -> Result<DynamicImage, TileError> {
    if raster.width == 0 || raster.height == 0 {
        return Err(TileError::UnsupportedRaster {
            message: format!("empty raster {}x{}", raster.width, raster.height),
        });
    }

    let channels: u16 = match raster.samples_per_pixel {
        3 | 4 => 3,
        _ => 1,
    };
    let pixels = raster.width as usize * raster.height as usize;
    let mut values = Vec::with_capacity(pixels * channels as usize);
    for y in 0..raster.height {
        for x in 0..raster.width {
            for s in 0..channels {
                values.push(raster.sample_f64(x, y, s));
            }
        }
    }

    let bytes = if raster.sample_format == SampleFormat::Uint && raster.bits_per_sample == 8 {
        values.iter().map(|&v| v as u8).collect()
    } else {
        stretch(&values)
    };

    let invalid = || TileError::UnsupportedRaster {
        message: "sample buffer does not match raster size".to_string(),
    };
    if channels == 3 {
        RgbImage::from_raw(raster.width, raster.height, bytes)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(invalid)
    } else {
        GrayImage::from_raw(raster.width, raster.height, bytes)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(invalid)
    }
}

/// Min/max stretch to 0..=255. NaNs map to 0.
fn stretch(values: &[f64]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return vec![0; values.len()];
    }
    values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect()
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
///
/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
