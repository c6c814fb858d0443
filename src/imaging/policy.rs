//! Write-time compression policy for size-capped storage.

use serde::{Deserialize, Serialize};

use super::NormalizeError;
use super::data_url::{DataUrl, is_jpeg_inline, is_too_large};
use super::normalize::{NormalizeOptions, decode, normalize_decoded};

/// Default ceiling for a single stored image, in KB
pub const DEFAULT_THRESHOLD_KB: f64 = 500.0;

/// Two-pass compression applied before an inline image is persisted.
///
/// 1. A JPEG already under the threshold is stored as-is.
/// 2. Otherwise it is normalized with `primary`.
/// 3. If that is still over the threshold, the original is normalized once
///    more with `fallback` and the result is kept whatever its size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CompressionPolicy {
    pub threshold_kb: f64,
    pub primary: NormalizeOptions,
    pub fallback: NormalizeOptions,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            threshold_kb: DEFAULT_THRESHOLD_KB,
            primary: NormalizeOptions::default(),
            fallback: NormalizeOptions::aggressive(),
        }
    }
}

impl CompressionPolicy {
    /// Apply the policy; on any failure the input is returned unchanged.
    pub fn apply(&self, image: &str) -> String {
        match self.try_apply(image) {
            Ok(compressed) => compressed,
            Err(e) => {
                log::warn!("Image optimization failed, storing original: {}", e);
                image.to_string()
            }
        }
    }

    /// Apply the policy, surfacing decode/encode failures.
    pub fn try_apply(&self, image: &str) -> Result<String, NormalizeError> {
        if is_jpeg_inline(image) && !is_too_large(image, self.threshold_kb) {
            return Ok(image.to_string());
        }

        let original = DataUrl::parse(image)?;
        let decoded = decode(&original.bytes)?;

        let first = normalize_decoded(&decoded, &self.primary)?;
        if !is_too_large(&first, self.threshold_kb) {
            return Ok(first);
        }

        log::debug!(
            "Image still {:.2}KB after first pass, recompressing with fallback settings",
            super::estimate_encoded_size_kb(&first)
        );
        normalize_decoded(&decoded, &self.fallback)
    }
}
