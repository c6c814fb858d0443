//! Inline (data URL) image encoding.
//!
//! Images travel through the engine as `data:<mime>;base64,<payload>` strings so
//! they can sit inside JSON documents.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::NormalizeError;

const PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// True if the string looks like an inline-encoded image
pub fn is_inline_image(value: &str) -> bool {
    value.starts_with("data:image")
}

/// True if the inline image is declared as JPEG
pub fn is_jpeg_inline(value: &str) -> bool {
    value.starts_with("data:image/jpeg") || value.starts_with("data:image/jpg")
}

/// A decoded data URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Wrap raw bytes, sniffing the mime type from their magic number.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let mime = image::guess_format(&bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        Self::new(mime, bytes)
    }

    /// Parse `data:<mime>;base64,<payload>`.
    pub fn parse(value: &str) -> Result<Self, NormalizeError> {
        let rest = value
            .strip_prefix(PREFIX)
            .ok_or_else(|| NormalizeError::InvalidDataUrl("missing data: prefix".to_string()))?;
        let (mime, payload) = rest
            .split_once(BASE64_MARKER)
            .ok_or_else(|| NormalizeError::InvalidDataUrl("not base64 encoded".to_string()))?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| NormalizeError::InvalidDataUrl(e.to_string()))?;
        Ok(Self::new(mime, bytes))
    }

    pub fn encode(&self) -> String {
        format!("{}{}{}{}", PREFIX, self.mime, BASE64_MARKER, STANDARD.encode(&self.bytes))
    }
}

/// Approximate decoded size in KB of an encoded string.
///
/// Three bytes per four characters, less trailing padding.
pub fn estimate_encoded_size_kb(encoded: &str) -> f64 {
    let padding = if encoded.ends_with("==") {
        2.0
    } else if encoded.ends_with('=') {
        1.0
    } else {
        0.0
    };
    let bytes = (encoded.len() as f64 * 0.75 - padding).max(0.0);
    bytes / 1024.0
}

/// True if the encoded image is estimated above `max_kb`
pub fn is_too_large(encoded: &str, max_kb: f64) -> bool {
    estimate_encoded_size_kb(encoded) > max_kb
}

/// Size of a raw buffer in KB
pub fn byte_size_kb(bytes: &[u8]) -> f64 {
    bytes.len() as f64 / 1024.0
}
