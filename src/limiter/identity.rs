//! Identity validation and bucket key generation.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Result, TokengateError};

/// Longest accepted identity, in characters.
pub const MAX_IDENTITY_LEN: usize = 1024;

/// Check that an identity is non-empty and within [`MAX_IDENTITY_LEN`].
pub fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(TokengateError::Identity("identity cannot be empty".to_string()));
    }
    let len = identity.chars().count();
    if len > MAX_IDENTITY_LEN {
        return Err(TokengateError::Identity(format!(
            "identity is too long ({} > {} characters)",
            len, MAX_IDENTITY_LEN
        )));
    }
    Ok(())
}

/// A validated identity.
///
/// Useful at the edge of an application where identities arrive as raw bytes
/// (headers, socket peers) and may not be text at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = TokengateError;

    fn try_from(value: String) -> Result<Self> {
        validate_identity(&value)?;
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Identity {
    type Error = TokengateError;

    fn try_from(value: &str) -> Result<Self> {
        Self::try_from(value.to_string())
    }
}

impl TryFrom<&[u8]> for Identity {
    type Error = TokengateError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(value)
            .map_err(|e| TokengateError::Identity(format!("identity must be valid UTF-8: {}", e)))?;
        Self::try_from(text)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The Redis key addressing one bucket.
///
/// Composed of the namespace, the algorithm tag and the SHA-256 of the
/// resolved identity, so raw identities never reach the key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// The namespace this bucket belongs to
    pub namespace: String,
    /// Algorithm tag
    pub tag: &'static str,
    /// Hex digest of the resolved identity
    pub digest: String,
}

impl BucketKey {
    /// Create a key for a (namespace, algorithm, identity) triple.
    pub fn new(namespace: &str, tag: &'static str, identity: &str) -> Self {
        let digest = hex::encode(Sha256::digest(identity.as_bytes()));
        Self {
            namespace: namespace.to_string(),
            tag,
            digest,
        }
    }

    /// Convert the key to its Redis string form.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.tag, self.digest)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
