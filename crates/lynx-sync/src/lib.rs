//! # lynx-sync
//! Checkpoint acquisition: the ordered local-file → CDN → seed-node
//! fallback pipeline, seed quorum verification, and corruption repair.

pub mod fetch;
pub mod persist;
pub mod pipeline;
pub mod quorum;
pub mod repair;

#[cfg(test)]
pub(crate) mod testutil;

pub use fetch::{HttpFetcher, SnapshotFetcher};
pub use pipeline::{AcquisitionConfig, CheckpointService, CycleOutcome, SourceKind};
pub use quorum::QuorumVerifier;
