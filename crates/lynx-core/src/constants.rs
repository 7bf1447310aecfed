//! Trust-layer constants: networks, genesis pins, endpoints, and thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SnapshotError;
use crate::types::Hash256;

/// Blocks per checkpoint (30 blocks ~= 60 minutes).
pub const CHECKPOINT_INTERVAL: u64 = 30;

/// Per-request timeout for the CDN fetch, in seconds.
pub const CDN_TIMEOUT_SECS: u64 = 10;
/// Per-request timeout for seed node fetches, in seconds. Slightly longer
/// than the CDN timeout since seeds are the fallback of last resort.
pub const SEED_TIMEOUT_SECS: u64 = 15;
/// Backoff between retries while waiting out detected corruption, in seconds.
pub const CORRUPTION_RETRY_SECS: u64 = 30;

/// Minimum quarantine duration (1 hour).
pub const QUARANTINE_MIN_SECS: u64 = 3600;
/// Maximum quarantine duration (6 hours).
pub const QUARANTINE_MAX_SECS: u64 = 21600;
/// Default quarantine duration when none is requested.
pub const QUARANTINE_DEFAULT_SECS: u64 = 3600;

/// Violation count that triggers node-wide quarantine.
pub const QUARANTINE_VIOLATION_THRESHOLD: i32 = 5;
/// Violation count that escalates a source to a 1-hour ban.
pub const TEMP_BAN_VIOLATIONS: i32 = 3;
/// Violation count that escalates a source to a 24-hour ban.
pub const PERSISTENT_BAN_VIOLATIONS: i32 = 5;
/// Violation count that escalates a source to a permanent ban.
pub const PERMANENT_BAN_VIOLATIONS: i32 = 8;

/// Score deducted per recorded violation.
pub const VIOLATION_SCORE_STEP: f32 = 0.15;
/// Floor for every reputation score. Never 0: a source can always climb back.
pub const SCORE_FLOOR: f32 = 0.1;
/// Score assigned to a source we have never heard from.
pub const NEUTRAL_SCORE: f32 = 0.5;
/// Minimum score for a source to count as trusted.
pub const TRUST_THRESHOLD: f32 = 0.7;

/// Fraction of responses that must confirm for query consensus.
pub const CONSENSUS_THRESHOLD: f32 = 0.66;
/// Minimum confirming responses for query consensus.
pub const CONSENSUS_MIN_CONFIRMATIONS: u64 = 2;
/// How long a security query accepts responses, in seconds.
pub const QUERY_TIMEOUT_SECS: u64 = 10;

/// Seed confirmations required to accept a remote snapshot.
///
/// 1-of-N trades attack resistance for availability; hardened deployments
/// can raise this through the acquisition config in lynx-sync.
pub const QUORUM_MIN_CONFIRMATIONS: usize = 1;

/// Seed confirmations required before repairing a conflicted checkpoint.
pub const REPAIR_MIN_CONFIRMATIONS: usize = 2;

/// File name of the local checkpoint snapshot.
pub const CHECKPOINT_FILE_NAME: &str = "checkpoints.json";
/// File name of the persisted permanent-ban set.
pub const BAN_FILE_NAME: &str = "permanent_bans.json";
/// Directory (next to the checkpoint file) where incident reports land.
pub const ALERT_DIR_NAME: &str = "security_alerts";

/// Hardcoded seed endpoints serving full checkpoint history.
///
/// These are the verification quorum and the fallback of last resort; they
/// are never learned from the network.
pub const SEED_URLS: [&str; 4] = [
    "http://seed1.lynxcoin.net:81/checkpoints/checkpoints.json",
    "http://seed2.lynxcoin.net:81/checkpoints/checkpoints.json",
    "http://seed3.lynxcoin.org:81/checkpoints/checkpoints.json",
    "http://seed4.lynxcoin.org:81/checkpoints/checkpoints.json",
];

/// Base URL of the checkpoint CDN.
pub const CDN_BASE_URL: &str = "https://lynxcoin.net/checkpoints";

const GENESIS_MAINNET: &str = "2407ad0dacc26071b276acde70db33ccac763ca5fd664f45d91ed59ec27bc599";
const GENESIS_TESTNET: &str = "a6fc2dabd8141fcc9bbb739928236bc6ac3278c7eea80a238e71728a88ebf740";
const GENESIS_STAGENET: &str = "ee63eb1c3c02a738824e93b974bfec37f24f88495dd31b2d30baa4d0a204ac29";

/// Network type: Mainnet, Testnet, or Stagenet.
///
/// Controls the genesis pin, the CDN file name, and the data directory
/// suffix. No remote source can ever override the genesis pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network.
    Testnet,
    /// Staging network for pre-release verification.
    Stagenet,
}

impl Network {
    /// Canonical lowercase name, as it appears in snapshot JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Stagenet => "stagenet",
        }
    }

    /// The hardcoded genesis hash for this network.
    ///
    /// Used only at height 0 and never overridden by any remote source.
    pub fn genesis_hash(&self) -> Hash256 {
        let hex = match self {
            Self::Mainnet => GENESIS_MAINNET,
            Self::Testnet => GENESIS_TESTNET,
            Self::Stagenet => GENESIS_STAGENET,
        };
        // Hardcoded 64-hex constants; parsing cannot fail.
        Hash256::from_hex(hex).expect("hardcoded genesis hash is valid hex")
    }

    /// File name of the published checkpoint set on the CDN.
    pub fn cdn_file_name(&self) -> &'static str {
        match self {
            Self::Mainnet => "checkpoints_mainnet_updated.json",
            Self::Testnet => "checkpoints_testnet_updated.json",
            Self::Stagenet => "checkpoints_stagenet.json",
        }
    }

    /// Full CDN URL for this network's checkpoint set.
    pub fn cdn_url(&self) -> String {
        format!("{CDN_BASE_URL}/{}", self.cdn_file_name())
    }

    /// Subdirectory name appended to the base data directory path.
    pub fn data_dir_suffix(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "stagenet" => Ok(Self::Stagenet),
            other => Err(SnapshotError::UnknownNetwork(other.to_string())),
        }
    }
}
