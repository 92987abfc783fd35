//! Numeric value extraction from raw device replies.
//!
//! Replies look like `5.00V`, `1.234A` or `12.50W`, possibly garbled by the firmware
//! quirk handled in [`correction`](super::correction). Extraction:
//!
//! 1. If the reply contains the byte `b'1'`, run [`fix_response`] over it first.
//! 2. Decode strictly as UTF-8.
//! 3. Take the first optionally signed decimal literal from the trimmed text.
//!
//! The gate in step 1 keys off `b'1'` while the correction itself keys off `b'.'`.
//! That mismatch is how the supply has always been driven and is kept as is.

use super::correction::fix_response;
use crate::error::ExtractionError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Presence of this byte anywhere in a reply enables the response correction.
pub const CORRECTION_TRIGGER: u8 = b'1';

/// Value reported by [`extract_or_sentinel`] when nothing could be extracted.
pub const SENTINEL_FAILURE: f64 = -1.0;

// ASCII digits only, so every match is accepted by `f64::from_str`
#[allow(clippy::expect_used)]
static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+").expect("numeric pattern is valid"));

/// Extracts the first numeric value from a raw reply.
///
/// Failures are logged at `warn` with the offending bytes.
///
/// # Errors
/// - `ExtractionError::NoData` for an empty (timed-out) reply
/// - `ExtractionError::Decode` if the bytes are not valid UTF-8
/// - `ExtractionError::NoNumber` if the text holds no numeric literal written with
///   ASCII digits
pub fn extract_value(raw: &[u8]) -> Result<f64, ExtractionError> {
    let result = extract_inner(raw);
    if let Err(err) = &result {
        tracing::warn!(raw = ?raw, error = %err, "Failed to parse value from reply");
    }
    result
}

fn extract_inner(raw: &[u8]) -> Result<f64, ExtractionError> {
    if raw.is_empty() {
        return Err(ExtractionError::NoData);
    }

    let bytes = if raw.contains(&CORRECTION_TRIGGER) {
        fix_response(raw.to_vec())
    } else {
        raw.to_vec()
    };

    let text = std::str::from_utf8(&bytes).map_err(|source| ExtractionError::Decode {
        raw: bytes.clone(),
        source,
    })?;
    let text = text.trim();

    let literal = NUMBER
        .find(text)
        .ok_or_else(|| ExtractionError::NoNumber(text.to_string()))?
        .as_str();

    literal.parse::<f64>().map_err(|source| ExtractionError::Parse {
        text: literal.to_string(),
        source,
    })
}

/// Like [`extract_value`] but collapses every failure to [`SENTINEL_FAILURE`].
///
/// A genuine reading of `-1.0` cannot be told apart from a failure here; prefer
/// `extract_value` unless a plain number is all the consumer can handle.
pub fn extract_or_sentinel(raw: &[u8]) -> f64 {
    extract_value(raw).unwrap_or(SENTINEL_FAILURE)
}
