//! Wire encoding of cached values.
//!
//! The remote store only holds strings, so "no value" and "empty value" are
//! written as two reserved tokens. These literals are shared with every other
//! component reading the same store and must not change.

use crate::error::{CacheError, CacheResult};

/// Stored form of a `None` value.
pub const NULL_TOKEN: &str = "RedisValueStringNull";
/// Stored form of an empty (or whitespace-only) value.
pub const EMPTY_TOKEN: &str = "RedisValueStringEmpty";

/// Encode a logical value for storage.
///
/// Fails when a raw value equals one of the reserved tokens, since it could
/// not be told apart from a marker on the way back.
pub fn encode(value: Option<&str>) -> CacheResult<String> {
    match value {
        None => Ok(NULL_TOKEN.to_string()),
        Some(v) if v.trim().is_empty() => Ok(EMPTY_TOKEN.to_string()),
        Some(v) if is_token(v) => Err(CacheError::reserved_value(v)),
        Some(v) => Ok(v.to_string()),
    }
}

/// Decode a stored string back into the logical value.
pub fn decode(stored: &str) -> Option<String> {
    if stored.eq_ignore_ascii_case(NULL_TOKEN) {
        None
    } else if stored.eq_ignore_ascii_case(EMPTY_TOKEN) {
        Some(String::new())
    } else {
        Some(stored.to_string())
    }
}

fn is_token(value: &str) -> bool {
    value.eq_ignore_ascii_case(NULL_TOKEN) || value.eq_ignore_ascii_case(EMPTY_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_round_trip() {
        let payload = r#"{"id":7,"items":["a","b"]}"#;
        for value in [None, Some(""), Some(payload)] {
            let stored = encode(value).unwrap();
            assert_eq!(decode(&stored).as_deref(), value);
        }
    }

    #[test]
    fn test_markers_are_bit_exact() {
        assert_eq!(encode(None).unwrap(), "RedisValueStringNull");
        assert_eq!(encode(Some("")).unwrap(), "RedisValueStringEmpty");
    }

    #[test]
    fn test_whitespace_is_stored_as_empty() {
        assert_eq!(encode(Some("  \n")).unwrap(), EMPTY_TOKEN);
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        assert_eq!(decode("redisvaluestringnull"), None);
        assert_eq!(decode("REDISVALUESTRINGEMPTY").as_deref(), Some(""));
    }

    #[test]
    fn test_reserved_tokens_rejected() {
        assert!(matches!(
            encode(Some(NULL_TOKEN)),
            Err(CacheError::ReservedValue { .. })
        ));
        assert!(encode(Some("redisvaluestringempty")).is_err());
    }
}
