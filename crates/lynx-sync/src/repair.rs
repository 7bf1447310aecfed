//! Corruption pause mode and conflict auto-repair.
//!
//! Two recovery flows, both driven by the seed set:
//!
//! - **Pause mode**: the local checkpoint file failed structural
//!   validation. This is detected tampering, so the response is
//!   fail-closed: clear everything and retry the seeds every 30 seconds,
//!   without bound, until a trustworthy snapshot arrives. Startup blocks
//!   for as long as that takes.
//! - **Conflict repair**: block validation found a hash contradicting a
//!   stored pin. If enough seeds are reachable to re-establish the truth,
//!   the offending pin is erased, history is reloaded, and an incident
//!   report is written.

use std::path::Path;

use tokio::time::sleep;
use tracing::{error, info, warn};

use lynx_core::constants::REPAIR_MIN_CONFIRMATIONS;
use lynx_core::error::{LynxError, SnapshotError};
use lynx_core::types::Hash256;

use crate::persist::{self, IncidentReport};
use crate::pipeline::{CheckpointService, CycleOutcome};

impl CheckpointService {
    /// Handle structural corruption of the local checkpoint file: write
    /// the incident report, then block in the pause loop until the seeds
    /// provide a valid replacement.
    pub(crate) async fn resolve_corruption(
        &self,
        path: &Path,
        cause: SnapshotError,
    ) -> CycleOutcome {
        error!(
            file = %path.display(),
            cause = %cause,
            "LOCAL CHECKPOINT FILE CORRUPTED: the file was modified or damaged \
             outside the daemon; entering fail-safe pause mode"
        );

        let (height, local_value) = match &cause {
            SnapshotError::MalformedHash { height, hash } => (*height, hash.clone()),
            other => (0, other.to_string()),
        };
        let report = IncidentReport {
            height,
            local_value,
            verified_value: "INVALID_FORMAT".to_string(),
            file: path.to_path_buf(),
            actions: vec![
                "in-memory checkpoints cleared".to_string(),
                "daemon paused until seeds provide a valid snapshot".to_string(),
            ],
        };
        if let Err(e) = persist::write_alert_report(&report) {
            warn!(error = %e, "could not write security alert report");
        }

        let attempts = self.pause_until_repaired().await;
        info!(attempts, "corruption pause resolved, resuming startup");
        CycleOutcome::RepairedFromSeeds
    }

    /// The fail-closed pause loop: clear the store, query the seeds, and
    /// keep retrying on a fixed backoff until one yields a non-empty valid
    /// snapshot. Never gives up on its own; killing the process is the
    /// only other way out. Returns the number of attempts taken.
    pub async fn pause_until_repaired(&self) -> u64 {
        let mut attempts = 0u64;
        loop {
            attempts += 1;
            self.store.lock().clear();
            warn!(
                attempt = attempts,
                "pause mode: attempting to load valid checkpoints from seed nodes"
            );

            if let Some((seed, snapshot)) = self.acquire_from_seeds().await {
                if snapshot.pins.is_empty() {
                    warn!(seed = %seed, "pause mode: seed returned an empty snapshot, retrying");
                } else {
                    // The store was just cleared, so merging cannot
                    // conflict with stale local state.
                    match self.merge_snapshot(&snapshot) {
                        Ok(added) => {
                            self.update_meta(&snapshot);
                            if let Err(e) = self.persist_current() {
                                warn!(error = %e, "pause mode: could not persist repaired checkpoints");
                            }
                            info!(
                                seed = %seed,
                                pins = added,
                                attempts,
                                "pause mode: valid checkpoints restored, exiting pause"
                            );
                            return attempts;
                        }
                        Err(e) => warn!(error = %e, "pause mode: merge failed, retrying"),
                    }
                }
            }

            info!(
                backoff_secs = self.config.corruption_retry_backoff.as_secs(),
                "pause mode: waiting before next attempt"
            );
            sleep(self.config.corruption_retry_backoff).await;
        }
    }

    /// Repair a checkpoint that conflicts with the verified network state.
    ///
    /// Requires at least `REPAIR_MIN_CONFIRMATIONS` seeds to respond with
    /// parseable snapshots before any local state is touched. On success
    /// the conflicted pin is erased, history is reloaded from the seeds,
    /// the file is rewritten, and an incident report is saved.
    ///
    /// Returns `Ok(false)` when the seed set could not re-establish the
    /// truth; the conflict then stands and the caller keeps failing loudly.
    pub async fn repair_conflict(
        &self,
        height: u64,
        received_hash: Hash256,
    ) -> Result<bool, LynxError> {
        error!(
            height,
            received = %received_hash,
            "checkpoint conflict detected, consulting seed nodes before repair"
        );

        let mut responsive = 0usize;
        for seed in &self.config.seed_urls {
            match self.fetcher.fetch(seed, self.config.seed_timeout).await {
                Ok(_) => responsive += 1,
                Err(e) => warn!(seed, error = %e, "repair: seed not reachable"),
            }
        }
        if responsive < REPAIR_MIN_CONFIRMATIONS {
            error!(
                responsive,
                required = REPAIR_MIN_CONFIRMATIONS,
                "repair: not enough seeds responded, conflict left unresolved"
            );
            return Ok(false);
        }

        let local_hash = self.store.lock().erase(height);

        let Some((seed, snapshot)) = self.acquire_from_seeds().await else {
            error!(height, "repair: seeds reachable but none served a valid snapshot");
            return Ok(false);
        };
        self.merge_snapshot(&snapshot)?;
        self.update_meta(&snapshot);
        self.persist_current()?;

        let report = IncidentReport {
            height,
            local_value: local_hash
                .map(|h| h.to_string())
                .unwrap_or_else(|| "<no local pin>".to_string()),
            verified_value: received_hash.to_string(),
            file: self.config.checkpoint_file(),
            actions: vec![
                "conflicting pin erased".to_string(),
                format!("checkpoint history reloaded from {seed}"),
                "local checkpoint file rewritten".to_string(),
            ],
        };
        if let Err(e) = persist::write_alert_report(&report) {
            warn!(error = %e, "could not write security alert report");
        }

        info!(height, seed = %seed, "checkpoint conflict repaired");
        Ok(true)
    }
}
