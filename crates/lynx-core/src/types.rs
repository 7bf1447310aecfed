//! Core checkpoint types.
//!
//! All block hashes travel over the wire as 64-character lowercase hex
//! strings and are stored as raw 32-byte values.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::HashError;

/// A 32-byte block hash.
///
/// Serializes as a 64-character hex string, matching the checkpoint wire
/// format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse a hash from exactly 64 hex characters.
    ///
    /// This is the structural validity rule for every hash that arrives
    /// from a checkpoint file, the CDN, or a seed node: anything that is
    /// not exactly 64 hex characters is treated as corrupt, not coerced.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::BadLength`] or [`HashError::NonHex`].
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != 64 {
            return Err(HashError::BadLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(HashError::NonHex);
        }
        let mut bytes = [0u8; 32];
        // Length and character set checked above; decode cannot fail.
        hex::decode_to_slice(s, &mut bytes).map_err(|_| HashError::NonHex)?;
        Ok(Self(bytes))
    }

    /// Lowercase hex encoding (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for Hash256 {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// An accepted (height, block hash) pin.
///
/// Pins are immutable once stored: a second claim for the same height with
/// a different hash is a conflict, never an update.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointPin {
    /// Block height the pin applies to.
    pub height: u64,
    /// The expected block hash at that height.
    pub hash: Hash256,
}
