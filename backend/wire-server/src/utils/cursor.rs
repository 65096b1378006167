//! Opaque pagination cursors
//!
//! A cursor pins the position of the last-returned entry as
//! `(timestamp, post_id)`, never an index, so filter churn between pages
//! cannot duplicate or skip entries.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use error_types::{AppError, AppResult};
use std::cmp::Ordering;

pub fn encode(timestamp: i64, post_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{}", timestamp, post_id))
}

pub fn decode(cursor: &str) -> AppResult<(i64, String)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| AppError::validation("Invalid cursor"))?;
    let raw = String::from_utf8(bytes).map_err(|_| AppError::validation("Invalid cursor"))?;
    let (ts, post_id) = raw
        .split_once(':')
        .ok_or_else(|| AppError::validation("Invalid cursor"))?;
    let timestamp = ts
        .parse::<i64>()
        .map_err(|_| AppError::validation("Invalid cursor"))?;
    if post_id.is_empty() {
        return Err(AppError::validation("Invalid cursor"));
    }
    Ok((timestamp, post_id.to_string()))
}

/// True when an entry at `(timestamp, post_id)` comes strictly after the
/// cursor position in the descending feed order. Ids tie-break numerically.
pub fn is_after(timestamp: i64, post_id: &str, cursor_ts: i64, cursor_post_id: &str) -> bool {
    timestamp < cursor_ts
        || (timestamp == cursor_ts
            && snowflake_id::compare(post_id, cursor_post_id) == Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cursor = encode(1_700_000_123_456, "987654321");
        let (ts, post_id) = decode(&cursor).unwrap();
        assert_eq!(ts, 1_700_000_123_456);
        assert_eq!(post_id, "987654321");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not-base64!!!").is_err());
        assert!(decode(&URL_SAFE_NO_PAD.encode("no-separator")).is_err());
        assert!(decode(&URL_SAFE_NO_PAD.encode("abc:1")).is_err());
        assert!(decode(&URL_SAFE_NO_PAD.encode("123:")).is_err());
    }

    #[test]
    fn test_is_after_orders_descending_with_tiebreak() {
        // Older timestamp comes after in a descending feed.
        assert!(is_after(100, "5", 200, "9"));
        assert!(!is_after(300, "5", 200, "9"));
        // Same timestamp: smaller (older) id comes after.
        assert!(is_after(200, "3", 200, "9"));
        assert!(!is_after(200, "9", 200, "9"));
    }
}
