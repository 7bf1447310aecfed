//! Error types for the Lynx checkpoint trust layer.
use thiserror::Error;

use crate::constants::Network;
use crate::types::Hash256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("hash must be exactly 64 hex characters, got {0}")] BadLength(usize),
    #[error("hash contains a non-hex character")] NonHex,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("conflicting checkpoint at height {height}: stored {existing}, got {candidate}")]
    Conflict { height: u64, existing: Hash256, candidate: Hash256 },
    #[error("conflicting difficulty checkpoint at height {height}: stored {existing}, got {candidate}")]
    DifficultyConflict { height: u64, existing: u128, candidate: u128 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("malformed hash at height {height}: {hash:?}")] MalformedHash { height: u64, hash: String },
    #[error("snapshot is for network {got}, expected {expected}")] WrongNetwork { expected: Network, got: Network },
    #[error("unknown network {0:?}")] UnknownNetwork(String),
    #[error("json: {0}")] Json(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request failed: {0}")] Request(String),
    #[error("request timed out")] Timeout,
    #[error("http status {0}")] Status(u16),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("io: {0}")] Io(String),
    #[error("json: {0}")] Json(String),
}

#[derive(Error, Debug)]
pub enum LynxError {
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Snapshot(#[from] SnapshotError),
    #[error(transparent)] Transport(#[from] TransportError),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error("io: {0}")] Io(String),
}

impl From<std::io::Error> for LynxError {
    fn from(e: std::io::Error) -> Self {
        LynxError::Io(e.to_string())
    }
}
