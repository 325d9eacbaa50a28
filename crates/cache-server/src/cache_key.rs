//! Content-addressed cache keys.
//!
//! A key is the lowercase hex MD5 digest of the raw `input` bytes, optionally
//! namespaced by a configured prefix. Unprefixed keys are 32 characters, well
//! under the memcached 250-byte key limit.

use md5::{Digest, Md5};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Length of the hex digest part of every key.
    pub const DIGEST_LEN: usize = 32;

    /// Derive the key for an input value.
    pub fn from_input(input: &[u8]) -> Self {
        Self::with_prefix("", input)
    }

    pub fn with_prefix(prefix: &str, input: &[u8]) -> Self {
        let digest = Md5::digest(input);
        Self(format!("{prefix}{digest:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            CacheKey::from_input(b"hello").as_str(),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_empty_input_has_a_key() {
        assert_eq!(
            CacheKey::from_input(b"").as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn test_equal_inputs_share_a_key() {
        let a = CacheKey::from_input("the same input".as_bytes());
        let b = CacheKey::from_input(String::from("the same input").as_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_inputs_get_distinct_keys() {
        let keys: HashSet<CacheKey> = (0..1000)
            .map(|i| CacheKey::from_input(format!("input-{i}").as_bytes()))
            .collect();
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_key_is_fixed_length_hex() {
        let key = CacheKey::from_input("a much longer input value than the digest itself".as_bytes());
        assert_eq!(key.as_str().len(), CacheKey::DIGEST_LEN);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_prefix_is_prepended() {
        let key = CacheKey::with_prefix("calc:", b"hello");
        assert_eq!(key.as_str(), "calc:5d41402abc4b2a76b9719d911017c592");
        assert_eq!(key.to_string(), key.as_str());
    }
}
