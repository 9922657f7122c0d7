//! Content digests in `sha256:<hex>` form

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;

/// A sha256 content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Digest of `data`
    pub fn of(data: &[u8]) -> Self {
        Self::from_sha256_hash(Sha256::digest(data).as_slice())
    }

    /// Wrap a finished sha256 hash
    pub fn from_sha256_hash(hash: &[u8]) -> Self {
        Self {
            hex: hex::encode(hash),
        }
    }

    /// Parse `sha256:<64 lowercase hex>`
    pub fn parse(s: &str) -> LifecycleResult<Self> {
        let hex = s
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| LifecycleError::InvalidDigest(s.to_string()))?;
        let valid = hex.len() == SHA256_HEX_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(LifecycleError::InvalidDigest(s.to_string()));
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }

    /// Hex part, used as the blob file name
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, self.hex)
    }
}

impl FromStr for Digest {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn digest_of_bytes() {
        assert_eq!(Digest::of(b"").to_string(), EMPTY);
    }

    #[test]
    fn parse_and_display() {
        let digest: Digest = EMPTY.parse().unwrap();
        assert_eq!(digest, Digest::of(b""));
        assert_eq!(digest.hex().len(), 64);
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "",
            "e3b0c442",
            "sha256:xyz",
            "md5:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
        ] {
            assert!(
                matches!(Digest::parse(bad), Err(LifecycleError::InvalidDigest(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn serde_as_string() {
        let digest = Digest::of(b"");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", EMPTY));
        assert_eq!(serde_json::from_str::<Digest>(&json).unwrap(), digest);
    }
}
