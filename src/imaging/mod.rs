//! Image normalization.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF, WebP) | `image::load_from_memory` |
//! | Resize | `DynamicImage::resize_exact`, `Triangle` filter |
//! | Encode | `JpegEncoder::new_with_quality` / PNG |
//! | Inline encoding | `base64` data URLs |
//!
//! The module is split into:
//! - **data_url**: inline encoding plus size estimation (pure, no pixels)
//! - **normalize**: decode, fit-inside-bounds, re-encode
//! - **policy**: the two-pass write-time compression used by the flat store

mod data_url;
mod normalize;
mod policy;

use thiserror::Error;

pub use data_url::{
    DataUrl, byte_size_kb, estimate_encoded_size_kb, is_inline_image, is_jpeg_inline, is_too_large,
};
pub use normalize::{
    NormalizeOptions, OutputFormat, decode, normalize, normalize_decoded, normalize_many, scaled_dimensions,
    thumbnail,
};
pub use policy::{CompressionPolicy, DEFAULT_THRESHOLD_KB};

/// Image processing failures
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Bytes could not be decoded as an image
    #[error("decode failed: {0}")]
    Decode(String),

    /// Re-encoding the scaled image failed
    #[error("encode failed: {0}")]
    Encode(String),

    /// Input string is not a base64 data URL
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),
}
