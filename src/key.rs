//! Cache keys: filesystem-safe names derived from URLs.

use crate::{KeyStrategy, Result, ThumbError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Longest cache key that still fits a file name with its extension.
///
/// Most filesystems cap a path component at 255 bytes; the remainder is
/// left for the `.` and the extension.
pub const MAX_KEY_LENGTH: usize = 240;

/// Returns the cache key of `url`.
///
/// The key never contains path separators or other reserved characters, so
/// it can be used directly as a file name.
///
/// With [`KeyStrategy::Sanitize`] every character that is not an ASCII
/// letter or digit is dropped. Two URLs sharing the same alphanumerics in
/// the same order map to the same key (`http://a.b/c` and `http://ab/c`);
/// those pages share one thumbnail.
///
/// The key is not length-checked here; see [`check_key_length`].
pub fn cache_key(url: &str, strategy: KeyStrategy) -> String {
    match strategy {
        KeyStrategy::Sanitize => url.chars().filter(char::is_ascii_alphanumeric).collect(),
        KeyStrategy::Base64 => URL_SAFE_NO_PAD.encode(url.as_bytes()),
    }
}

/// Rejects keys that cannot be used as a file name.
pub fn check_key_length(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(ThumbError::InvalidUrl(format!(
            "cache key is {} bytes, longer than the {} byte limit",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Recovers the URL from a [`KeyStrategy::Base64`] key.
pub fn decode_key(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_non_alphanumerics() {
        assert_eq!(
            cache_key("http://www.example.com/index.pl?a=1", KeyStrategy::Sanitize),
            "httpwwwexamplecomindexpla1"
        );
        assert_eq!(cache_key("https://dev.example.org/", KeyStrategy::Sanitize), "httpsdevexampleorg");
    }

    #[test]
    fn test_sanitize_is_deterministic() {
        let url = "http://example.com/some/page?x=y#frag";
        assert_eq!(
            cache_key(url, KeyStrategy::Sanitize),
            cache_key(url, KeyStrategy::Sanitize)
        );
        assert_eq!(cache_key(url, KeyStrategy::Base64), cache_key(url, KeyStrategy::Base64));
    }

    #[test]
    fn test_sanitize_collision_is_accepted() {
        assert_eq!(
            cache_key("http://a.b/c", KeyStrategy::Sanitize),
            cache_key("http://ab/c", KeyStrategy::Sanitize)
        );
        assert_ne!(
            cache_key("http://a.b/c", KeyStrategy::Base64),
            cache_key("http://ab/c", KeyStrategy::Base64)
        );
    }

    #[test]
    fn test_keys_are_path_safe() {
        let urls = [
            "http://example.com/a/b/c?d=e&f=g",
            "https://例え.jp/パス",
            "http://example.com/~user/%2F..%2F",
            "http://example.com/?????>>>",
        ];
        for url in urls {
            for strategy in [KeyStrategy::Sanitize, KeyStrategy::Base64] {
                let key = cache_key(url, strategy);
                assert!(!key.is_empty());
                assert!(
                    key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                    "unsafe key {key:?} for {url}"
                );
            }
        }
    }

    #[test]
    fn test_key_length_limit() {
        let long_query = format!("http://example.com/search?q={}", "a".repeat(300));
        for strategy in [KeyStrategy::Sanitize, KeyStrategy::Base64] {
            let key = cache_key(&long_query, strategy);
            assert!(matches!(check_key_length(&key), Err(ThumbError::InvalidUrl(_))));
        }

        assert!(check_key_length(&cache_key("http://example.com/", KeyStrategy::Base64)).is_ok());
        assert!(check_key_length(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
        assert!(check_key_length(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_base64_roundtrip() {
        let url = "http://www.example.com/index?q=thumbs";
        let key = cache_key(url, KeyStrategy::Base64);
        assert_eq!(decode_key(&key).as_deref(), Some(url));
        assert_eq!(decode_key("not base64!"), None);
    }
}
