//! ID and timestamp generation for recipebox
//!
//! Provides identifiers for recipes and image records plus the clock helpers
//! that keep `updatedAt` monotonic.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Per-process sequence mixed into every id so two ids minted in the same
/// millisecond still differ.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Current wall-clock time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp for a record that was last touched at `previous`.
///
/// Always strictly later than `previous`, even if the clock has not advanced.
pub fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Generate a unique recipe ID
///
/// Format: `{timestamp_ms base36}{sequence base36, 4 wide}{random hex, 8 wide}`
/// Example: `mg2x1k7a00a3f09c1b2d`
pub fn generate_id() -> String {
    let timestamp = to_base36(now_ms());
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 36u64.pow(4);
    let random: u32 = rand::rng().random();
    format!("{}{:0>4}{:08x}", timestamp, to_base36(sequence), random)
}

/// Deterministic id of an image record: `{recipe_id}_{image_name}`
pub fn image_id(recipe_id: &str, image_name: &str) -> String {
    format!("{}_{}", recipe_id, image_name)
}
