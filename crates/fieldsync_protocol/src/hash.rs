//! Content digests.
//!
//! Local file bytes and remote field values are hashed the same way, so two
//! digests compare equal exactly when the underlying bytes do (up to SHA-256
//! collisions).

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const PREFIX: &str = "sha256:";

/// SHA-256 digest of some content, rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes raw bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{}{:x}", PREFIX, hasher.finalize()))
    }

    /// Hashes a remote field value.
    ///
    /// Equivalent to hashing the UTF-8 bytes of `value`.
    pub fn of_str(value: &str) -> Self {
        Self::of(value.as_bytes())
    }

    /// Parses a previously rendered digest.
    pub fn parse(s: &str) -> ProtocolResult<Self> {
        let hex = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ProtocolError::InvalidHash(s.to_string()))?;
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the rendered form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_value() {
        assert_eq!(
            ContentHash::of(b"hello world").as_str(),
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn str_and_bytes_agree() {
        assert_eq!(
            ContentHash::of_str("gs.info('hi');"),
            ContentHash::of(b"gs.info('hi');")
        );
    }

    #[test]
    fn empty_content_has_a_hash() {
        let empty = ContentHash::of(b"");
        assert_ne!(empty, ContentHash::of(b" "));
    }

    #[test]
    fn parse_rejects_foreign_digests() {
        assert!(ContentHash::parse("5eb63bbbe01eeed093cb22bb8f5acdc3").is_err());
        assert!(ContentHash::parse("sha256:xyz").is_err());
        let hash = ContentHash::of(b"abc");
        assert_eq!(ContentHash::parse(hash.as_str()).unwrap(), hash);
    }

    proptest! {
        #[test]
        fn equal_bytes_equal_hash(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(ContentHash::of(&data), ContentHash::of(&data.clone()));
        }

        #[test]
        fn different_bytes_different_hash(
            a in proptest::collection::vec(any::<u8>(), 0..256),
            b in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(ContentHash::of(&a), ContentHash::of(&b));
        }
    }
}
