//! Decode, downscale and re-encode images into data URLs.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use super::NormalizeError;
use super::data_url::DataUrl;

/// Output encoding of a normalized image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Size and quality bounds for one normalization pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NormalizeOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// Lossy quality in (0, 1]; ignored for PNG
    pub quality: f32,
    pub format: OutputFormat,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_width: 800,
            max_height: 600,
            quality: 0.7,
            format: OutputFormat::Jpeg,
        }
    }
}

impl NormalizeOptions {
    /// Second, harsher pass used when the default pass is still too big
    pub fn aggressive() -> Self {
        Self {
            max_width: 600,
            max_height: 450,
            quality: 0.5,
            format: OutputFormat::Jpeg,
        }
    }

    /// Square bounds at fixed quality 0.6
    pub fn thumbnail(size: u32) -> Self {
        Self {
            max_width: size,
            max_height: size,
            quality: 0.6,
            format: OutputFormat::Jpeg,
        }
    }

    /// Quality mapped onto the encoder's 1-100 scale
    pub fn encoder_quality(&self) -> u8 {
        (self.quality.clamp(0.0, 1.0) * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

/// Target dimensions that fit `(width, height)` inside the bounds.
///
/// Aspect ratio is preserved and images are never enlarged.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    if ratio < 1.0 {
        let w = ((width as f64 * ratio).floor() as u32).max(1);
        let h = ((height as f64 * ratio).floor() as u32).max(1);
        (w, h)
    } else {
        (width, height)
    }
}

/// Decode raw image bytes.
pub fn decode(raw: &[u8]) -> Result<DynamicImage, NormalizeError> {
    image::load_from_memory(raw).map_err(|e| NormalizeError::Decode(e.to_string()))
}

/// Downscale and re-encode an already decoded image.
pub fn normalize_decoded(img: &DynamicImage, options: &NormalizeOptions) -> Result<String, NormalizeError> {
    let (width, height) = scaled_dimensions(img.width(), img.height(), options.max_width, options.max_height);
    let resized;
    let source = if (width, height) != (img.width(), img.height()) {
        resized = img.resize_exact(width, height, FilterType::Triangle);
        &resized
    } else {
        img
    };

    let mut buf = Vec::new();
    match options.format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(source.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, options.encoder_quality());
            rgb.write_with_encoder(encoder)
                .map_err(|e| NormalizeError::Encode(e.to_string()))?;
        }
        OutputFormat::Png => {
            source
                .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(|e| NormalizeError::Encode(e.to_string()))?;
        }
    }

    Ok(DataUrl::new(options.format.mime(), buf).encode())
}

/// Decode `raw`, fit it inside the bounds and re-encode as a data URL.
pub fn normalize(raw: &[u8], options: &NormalizeOptions) -> Result<String, NormalizeError> {
    let img = decode(raw)?;
    normalize_decoded(&img, options)
}

/// Square thumbnail at quality 0.6
pub fn thumbnail(raw: &[u8], size: u32) -> Result<String, NormalizeError> {
    normalize(raw, &NormalizeOptions::thumbnail(size))
}

/// Normalize a batch, best effort.
///
/// An item that fails is replaced by its original bytes as a data URL; the
/// batch never aborts and keeps input order.
pub fn normalize_many<B: AsRef<[u8]>>(files: &[B], options: &NormalizeOptions) -> Vec<String> {
    files
        .iter()
        .enumerate()
        .map(|(index, file)| {
            let raw = file.as_ref();
            normalize(raw, options).unwrap_or_else(|e| {
                log::warn!("Image {} could not be normalized, keeping original: {}", index, e);
                DataUrl::from_bytes(raw.to_vec()).encode()
            })
        })
        .collect()
}
