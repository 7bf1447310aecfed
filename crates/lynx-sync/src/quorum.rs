//! Seed quorum verification.
//!
//! Before a remote snapshot is trusted, its epoch is checked against a
//! fixed set of seed endpoints. Each seed is fetched independently with a
//! bounded timeout; a seed confirms the candidate iff it serves a snapshot
//! with the same `epoch_id`. Failures of any kind (no response, bad
//! status, unparseable body) are non-confirmations, never denials.
//!
//! Two extra exclusions keep a rogue seed from manufacturing agreement:
//! a seed whose own height-0 pin contradicts the hardcoded genesis hash is
//! discarded wholesale, and a seed that is banned or scoring low in the
//! reputation ledger is skipped without being fetched.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use lynx_core::constants::Network;
use lynx_trust::ledger::ReputationLedger;

use crate::fetch::SnapshotFetcher;

/// Verifies candidate epochs against the seed set.
pub struct QuorumVerifier {
    fetcher: Arc<dyn SnapshotFetcher>,
    seeds: Vec<String>,
    timeout: Duration,
    min_confirmations: usize,
}

impl QuorumVerifier {
    /// Create a verifier over `seeds`.
    ///
    /// `min_confirmations` is how many seeds must agree before a snapshot
    /// is accepted; the shipped default is 1-of-N.
    pub fn new(
        fetcher: Arc<dyn SnapshotFetcher>,
        seeds: Vec<String>,
        timeout: Duration,
        min_confirmations: usize,
    ) -> Self {
        Self {
            fetcher,
            seeds,
            timeout,
            min_confirmations,
        }
    }

    /// Count how many seeds confirm `epoch` for `network`.
    ///
    /// The ledger is only read (to skip distrusted seeds) and is never
    /// held across a fetch.
    pub async fn confirmations(
        &self,
        network: Network,
        epoch: u64,
        ledger: &Mutex<ReputationLedger>,
    ) -> usize {
        let mut confirmed = 0usize;

        for seed in &self.seeds {
            if !ledger.lock().is_trusted_default(seed) {
                warn!(seed, "quorum: distrusted seed skipped");
                continue;
            }

            let raw = match self.fetcher.fetch(seed, self.timeout).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!(seed, error = %e, "quorum: seed unavailable");
                    continue;
                }
            };
            let snapshot = match raw.validate(network) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(seed, error = %e, "quorum: seed snapshot malformed");
                    continue;
                }
            };
            if !snapshot.genesis_matches() {
                warn!(seed, "quorum: seed serves a foreign genesis, discarded");
                continue;
            }

            if snapshot.epoch_id == epoch {
                confirmed += 1;
                info!(seed, epoch, "quorum: seed confirmed epoch");
            } else {
                debug!(
                    seed,
                    seed_epoch = snapshot.epoch_id,
                    candidate_epoch = epoch,
                    "quorum: seed has different epoch"
                );
            }
        }

        confirmed
    }

    /// Whether at least `min_confirmations` seeds confirm `epoch`.
    pub async fn verify(
        &self,
        network: Network,
        epoch: u64,
        ledger: &Mutex<ReputationLedger>,
    ) -> bool {
        let confirmed = self.confirmations(network, epoch, ledger).await;
        let accepted = confirmed >= self.min_confirmations;
        if accepted {
            info!(
                confirmed,
                required = self.min_confirmations,
                epoch,
                "quorum: epoch verified by seeds"
            );
        } else {
            warn!(
                confirmed,
                required = self.min_confirmations,
                epoch,
                "quorum: insufficient seed agreement, snapshot rejected"
            );
        }
        accepted
    }

    /// The configured seed URLs.
    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }
}
