//! Repair of the 1697B's malformed numeric replies.
//!
//! The firmware occasionally inserts one spurious byte straight after the decimal
//! point of a reading. A well-formed reading ends in a `D.DDD<unit>` tail, i.e. exactly
//! five bytes after the `.`; a corrupted one has six. Dropping the byte after the point
//! restores the expected tail and leaves everything else alone.

/// Byte value of the decimal point.
pub const DECIMAL_POINT: u8 = b'.';

/// Number of bytes that follow the decimal point in a well-formed reading.
pub const EXPECTED_TAIL_LEN: usize = 5;

/// Removes the spurious byte after the first decimal point that is followed by
/// exactly `EXPECTED_TAIL_LEN + 1` bytes.
///
/// Applied at most once. Sequences without such a decimal point are returned unchanged,
/// including the empty sequence and readings whose tail is already five bytes long.
///
/// ```
/// use bk_psu::instrument::correction::fix_response;
///
/// assert_eq!(fix_response(b"1.X000V\n".to_vec()), b"1.000V\n".to_vec());
/// assert_eq!(fix_response(b"1.000V\n".to_vec()), b"1.000V\n".to_vec());
/// ```
pub fn fix_response(mut bytes: Vec<u8>) -> Vec<u8> {
    let corrupt_at = bytes
        .iter()
        .enumerate()
        .find(|&(i, &b)| b == DECIMAL_POINT && bytes.len() - (i + 1) == EXPECTED_TAIL_LEN + 1)
        .map(|(i, _)| i);

    if let Some(i) = corrupt_at {
        let removed = bytes.remove(i + 1);
        tracing::debug!(
            index = i + 1,
            removed,
            "Dropped spurious byte after decimal point"
        );
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_unchanged() {
        assert!(fix_response(Vec::new()).is_empty());
    }

    #[test]
    fn test_without_decimal_point_is_unchanged() {
        let raw = b"BK PRECISION,1697B\n".to_vec();
        assert_eq!(fix_response(raw.clone()), raw);
    }

    #[test]
    fn test_six_trailing_bytes_drops_the_first_of_them() {
        // '.' at index 1, followed by "0", "7", "0", "0", "V", "\n"
        let raw = vec![b'9', b'.', b'0', b'7', b'0', b'0', b'V', b'\n'];
        let fixed = fix_response(raw.clone());

        assert_eq!(fixed.len(), raw.len() - 1);
        assert_eq!(fixed, vec![b'9', b'.', b'7', b'0', b'0', b'V', b'\n']);
    }

    #[test]
    fn test_five_trailing_bytes_is_left_alone() {
        let raw = b"9.000V\n".to_vec();
        assert_eq!(raw.len() - 2, EXPECTED_TAIL_LEN);
        assert_eq!(fix_response(raw.clone()), raw);
    }

    #[test]
    fn test_only_first_qualifying_point_is_corrected() {
        // the first '.' has 10 bytes after it and does not qualify; the second has 6
        let raw = b"1.2,3.456789".to_vec();
        let fixed = fix_response(raw);
        assert_eq!(fixed, b"1.2,3.56789".to_vec());
    }

    #[test]
    fn test_correction_applied_at_most_once() {
        // '.' at 1 qualifies; afterwards the '.' at 0 would too, but scanning has stopped
        let raw = b"..123456".to_vec();
        let fixed = fix_response(raw);
        assert_eq!(fixed, b"..23456".to_vec());
    }
}
