//! Checkpoint snapshot: the JSON unit exchanged with the CDN, seed nodes,
//! and the local checkpoint file.
//!
//! A snapshot arrives as untrusted text. Parsing ([`RawSnapshot::from_json`])
//! only establishes that it is JSON of the right shape; structural
//! validation ([`RawSnapshot::validate`]) enforces the 64-hex-character hash
//! rule and the network binding, producing a [`CheckpointSnapshot`] whose
//! pins are safe to merge. The two stages are separate because their
//! failures are handled differently: a local file that fails validation is
//! *corruption* (fail-closed), while a remote body that fails either stage
//! is mere unavailability (fall through to the next source).

use serde::{Deserialize, Serialize};

use crate::constants::Network;
use crate::error::SnapshotError;
use crate::store::CheckpointStore;
use crate::types::{CheckpointPin, Hash256};

/// One (height, hash) line of the wire format. The hash stays a string
/// until structural validation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HashLine {
    pub height: u64,
    pub hash: String,
}

/// The checkpoint JSON envelope, exactly as serialized on disk and over
/// the wire.
///
/// All metadata fields default when absent so that legacy files (written
/// before epochs existed) still parse; a zero `epoch_id` is then rejected
/// by replay protection, not by the parser.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RawSnapshot {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub checkpoint_interval: u64,
    #[serde(default)]
    pub epoch_id: u64,
    #[serde(default)]
    pub generated_at_ts: u64,
    #[serde(default)]
    pub hashlines: Vec<HashLine>,
}

impl RawSnapshot {
    /// Parse a snapshot from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Json`] when the body is not a snapshot
    /// object at all.
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(text).map_err(|e| SnapshotError::Json(e.to_string()))
    }

    /// Serialize to pretty JSON for the local checkpoint file.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|e| SnapshotError::Json(e.to_string()))
    }

    /// Whether the envelope carries replay-protection metadata.
    pub fn has_epoch(&self) -> bool {
        self.epoch_id != 0
    }

    /// Structurally validate against `expected` network rules.
    ///
    /// Every hash must be exactly 64 hex characters. A declared network
    /// that differs from `expected` is rejected; an empty network field is
    /// treated as legacy and assumed to mean `expected`.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::MalformedHash`] on the first bad hash line,
    /// [`SnapshotError::WrongNetwork`] / [`SnapshotError::UnknownNetwork`]
    /// on a network mismatch.
    pub fn validate(&self, expected: Network) -> Result<CheckpointSnapshot, SnapshotError> {
        let network = if self.network.is_empty() {
            expected
        } else {
            let declared: Network = self.network.parse()?;
            if declared != expected {
                return Err(SnapshotError::WrongNetwork {
                    expected,
                    got: declared,
                });
            }
            declared
        };

        let mut pins = Vec::with_capacity(self.hashlines.len());
        for line in &self.hashlines {
            let hash = Hash256::from_hex(&line.hash).map_err(|_| SnapshotError::MalformedHash {
                height: line.height,
                hash: line.hash.clone(),
            })?;
            pins.push(CheckpointPin {
                height: line.height,
                hash,
            });
        }

        Ok(CheckpointSnapshot {
            network,
            checkpoint_interval: self.checkpoint_interval,
            epoch_id: self.epoch_id,
            generated_at: self.generated_at_ts,
            pins,
        })
    }

    /// Build an envelope from the current store contents, for persistence.
    pub fn from_store(
        store: &CheckpointStore,
        network: Network,
        checkpoint_interval: u64,
        epoch_id: u64,
        generated_at_ts: u64,
    ) -> Self {
        Self {
            network: network.as_str().to_string(),
            checkpoint_interval,
            epoch_id,
            generated_at_ts,
            hashlines: store
                .pins()
                .map(|pin| HashLine {
                    height: pin.height,
                    hash: pin.hash.to_hex(),
                })
                .collect(),
        }
    }
}

/// A structurally valid snapshot whose pins are ready to merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    pub network: Network,
    pub checkpoint_interval: u64,
    pub epoch_id: u64,
    pub generated_at: u64,
    pub pins: Vec<CheckpointPin>,
}

impl CheckpointSnapshot {
    /// The height-0 pin, if the snapshot carries one.
    pub fn genesis_pin(&self) -> Option<&CheckpointPin> {
        self.pins.iter().find(|pin| pin.height == 0)
    }

    /// Whether the snapshot's height-0 pin (if any) matches the hardcoded
    /// genesis hash for its network.
    ///
    /// A snapshot with no height-0 pin passes: it simply asserts nothing
    /// about genesis.
    pub fn genesis_matches(&self) -> bool {
        match self.genesis_pin() {
            Some(pin) => pin.hash == self.network.genesis_hash(),
            None => true,
        }
    }
}
