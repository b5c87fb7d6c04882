use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tapestore_error::TapeError;

/// Digest algorithm used for tar content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestType {
    Sha256,
    #[default]
    Sha512,
}

impl DigestType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the lowercase hex rendering.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestType {
    type Err = TapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            other => Err(TapeError::config(format!("unsupported digest type {other}"))),
        }
    }
}

/// Size and content digest of a tar file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigestWithSize {
    pub size: u64,
    /// Lowercase hex.
    pub digest: String,
    pub digest_type: DigestType,
}

impl DigestWithSize {
    #[must_use]
    pub fn new(size: u64, digest: impl Into<String>, digest_type: DigestType) -> Self {
        Self {
            size,
            digest: digest.into(),
            digest_type,
        }
    }
}

impl fmt::Display for DigestWithSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, {}:{}", self.size, self.digest_type, self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_type_parse() {
        assert_eq!("SHA-512".parse::<DigestType>().expect("parse"), DigestType::Sha512);
        assert_eq!("sha256".parse::<DigestType>().expect("parse"), DigestType::Sha256);
        assert!("md5".parse::<DigestType>().is_err());
        assert_eq!(DigestType::default(), DigestType::Sha512);
    }

    #[test]
    fn test_digest_type_serde_lowercase() {
        let json = serde_json::to_string(&DigestType::Sha256).expect("serialize");
        assert_eq!(json, "\"sha256\"");
    }
}
