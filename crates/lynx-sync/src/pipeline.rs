//! The ordered checkpoint acquisition pipeline.
//!
//! One cycle attempts sources in fixed order (local file, HTTPS CDN,
//! seed nodes), gating each remote snapshot behind replay protection
//! ([`EpochValidator`]) and seed agreement ([`QuorumVerifier`]).
//!
//! Failure semantics are deliberately asymmetric:
//!
//! - **Detected corruption** of the local file is fail-closed: the cycle
//!   enters the pause loop in [`crate::repair`] and does not return until
//!   a trustworthy replacement has been obtained from the seeds.
//! - **Unavailability** (every remote source down) is fail-open: the node
//!   continues without fresh checkpoint protection, loudly logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use lynx_core::constants::{
    Network, BAN_FILE_NAME, CDN_TIMEOUT_SECS, CHECKPOINT_FILE_NAME, CHECKPOINT_INTERVAL,
    CORRUPTION_RETRY_SECS, QUARANTINE_DEFAULT_SECS, QUORUM_MIN_CONFIRMATIONS, SEED_TIMEOUT_SECS,
    SEED_URLS,
};
use lynx_core::epoch::EpochValidator;
use lynx_core::error::LynxError;
use lynx_core::snapshot::{CheckpointSnapshot, RawSnapshot};
use lynx_core::store::CheckpointStore;
use lynx_core::time::unix_now;
use lynx_trust::ledger::{BanReason, ReputationLedger};
use lynx_trust::quarantine::QuarantineController;

use crate::fetch::SnapshotFetcher;
use crate::persist;
use crate::quorum::QuorumVerifier;

/// How often the periodic refresh re-runs the acquisition cycle.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 3600;

/// Everything the pipeline needs to know about its environment.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub network: Network,
    /// Directory holding the checkpoint file and the ban file.
    pub data_dir: PathBuf,
    pub cdn_url: String,
    pub seed_urls: Vec<String>,
    pub cdn_timeout: Duration,
    pub seed_timeout: Duration,
    /// Seeds that must agree before a CDN snapshot is accepted.
    pub quorum_min_confirmations: usize,
    /// Backoff between retries while waiting out detected corruption.
    pub corruption_retry_backoff: Duration,
    pub refresh_interval: Duration,
}

impl AcquisitionConfig {
    /// Defaults for `network`, rooted at `data_dir`.
    pub fn for_network(network: Network, data_dir: PathBuf) -> Self {
        Self {
            network,
            data_dir,
            cdn_url: network.cdn_url(),
            seed_urls: SEED_URLS.iter().map(|s| s.to_string()).collect(),
            cdn_timeout: Duration::from_secs(CDN_TIMEOUT_SECS),
            seed_timeout: Duration::from_secs(SEED_TIMEOUT_SECS),
            quorum_min_confirmations: QUORUM_MIN_CONFIRMATIONS,
            corruption_retry_backoff: Duration::from_secs(CORRUPTION_RETRY_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }

    /// Path of the local checkpoint file.
    pub fn checkpoint_file(&self) -> PathBuf {
        self.data_dir.join(CHECKPOINT_FILE_NAME)
    }

    /// Path of the persisted permanent-ban file.
    pub fn ban_file(&self) -> PathBuf {
        self.data_dir.join(BAN_FILE_NAME)
    }
}

/// Which source refreshed the store this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Cdn,
    Seed,
}

/// What an acquisition cycle ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New pins verified and merged from the given remote source.
    Refreshed(SourceKind),
    /// The local file only; every remote source failed. The node proceeds
    /// without fresh checkpoint protection.
    FailOpen,
    /// Quarantine is active; no remote snapshot was accepted.
    QuarantineRefused,
    /// The local file was corrupt; the pause loop replaced it from seeds.
    RepairedFromSeeds,
}

/// Snapshot envelope metadata carried for persistence.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotMeta {
    pub epoch_id: u64,
    pub checkpoint_interval: u64,
    pub generated_at: u64,
}

impl Default for SnapshotMeta {
    fn default() -> Self {
        Self {
            epoch_id: 0,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            generated_at: 0,
        }
    }
}

/// Owner of the checkpoint trust state and driver of acquisition.
///
/// All shared state sits behind coarse per-component mutexes with short
/// critical sections; network fetches and sleeps always happen with every
/// lock released.
pub struct CheckpointService {
    pub(crate) config: AcquisitionConfig,
    pub(crate) store: Arc<Mutex<CheckpointStore>>,
    pub(crate) epochs: Mutex<EpochValidator>,
    pub(crate) ledger: Arc<Mutex<ReputationLedger>>,
    pub(crate) quarantine: Arc<Mutex<QuarantineController>>,
    pub(crate) fetcher: Arc<dyn SnapshotFetcher>,
    pub(crate) quorum: QuorumVerifier,
    pub(crate) meta: Mutex<SnapshotMeta>,
}

impl CheckpointService {
    /// Build a service from config and a fetcher implementation.
    pub fn new(config: AcquisitionConfig, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        let quorum = QuorumVerifier::new(
            Arc::clone(&fetcher),
            config.seed_urls.clone(),
            config.seed_timeout,
            config.quorum_min_confirmations,
        );
        Self {
            config,
            store: Arc::new(Mutex::new(CheckpointStore::new())),
            epochs: Mutex::new(EpochValidator::new()),
            ledger: Arc::new(Mutex::new(ReputationLedger::new())),
            quarantine: Arc::new(Mutex::new(QuarantineController::new())),
            fetcher,
            quorum,
            meta: Mutex::new(SnapshotMeta::default()),
        }
    }

    /// The acquisition configuration.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Shared handle to the checkpoint store, for the blockchain validator.
    pub fn store(&self) -> Arc<Mutex<CheckpointStore>> {
        Arc::clone(&self.store)
    }

    /// Shared handle to the reputation ledger, for the query protocol.
    pub fn ledger(&self) -> Arc<Mutex<ReputationLedger>> {
        Arc::clone(&self.ledger)
    }

    /// Shared handle to the quarantine controller.
    pub fn quarantine(&self) -> Arc<Mutex<QuarantineController>> {
        Arc::clone(&self.quarantine)
    }

    /// Startup sequence: restore permanent bans, pin genesis, run the
    /// first acquisition cycle.
    pub async fn startup(&self) -> Result<CycleOutcome, LynxError> {
        if let Err(e) = self
            .ledger
            .lock()
            .load_permanent_bans(&self.config.ban_file())
        {
            warn!(error = %e, "could not load permanent bans, starting with an empty set");
        }
        self.bootstrap_genesis()?;
        self.run_cycle().await
    }

    /// Pin the hardcoded genesis hash for the active network.
    pub fn bootstrap_genesis(&self) -> Result<(), LynxError> {
        let genesis = self.config.network.genesis_hash();
        self.store.lock().add_with_difficulty(0, genesis, 1)?;
        debug!(network = %self.config.network, "genesis checkpoint pinned");
        Ok(())
    }

    /// Run one acquisition cycle: local file, then CDN, then seeds.
    ///
    /// # Errors
    ///
    /// Only a conflicting checkpoint (two hashes claimed for one height)
    /// is a hard error here; transport and quorum failures drive fallback
    /// instead of surfacing.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, LynxError> {
        let path = self.config.checkpoint_file();

        // 1. Local file.
        match persist::read_local_snapshot(&path) {
            Ok(None) => debug!("no local checkpoint file, continuing to remote sources"),
            Ok(Some(raw)) => match raw.validate(self.config.network) {
                Ok(snapshot) => {
                    if raw.has_epoch() {
                        self.merge_snapshot(&snapshot)?;
                        self.update_meta(&snapshot);
                        info!(
                            pins = snapshot.pins.len(),
                            epoch = snapshot.epoch_id,
                            "local checkpoint file loaded"
                        );
                    } else {
                        // Legacy file without replay protection: its pins
                        // are not trusted, genesis-only bootstrap stands.
                        warn!(
                            file = %path.display(),
                            "local checkpoint file has no epoch_id, ignoring its pins"
                        );
                    }
                }
                Err(e) => return Ok(self.resolve_corruption(&path, e).await),
            },
            Err(LynxError::Snapshot(e)) => return Ok(self.resolve_corruption(&path, e).await),
            Err(e) => {
                warn!(error = %e, "could not read local checkpoint file, treating as absent");
            }
        }

        // 2. Quarantine gate: under lockout, no new snapshot is accepted.
        if self.quarantine.lock().is_active() {
            warn!("quarantine active: refusing to acquire new checkpoint snapshots");
            return Ok(CycleOutcome::QuarantineRefused);
        }

        // 3. HTTPS CDN.
        if let Some(snapshot) = self.acquire_from_cdn().await {
            self.merge_snapshot(&snapshot)?;
            self.update_meta(&snapshot);
            self.persist_current()?;
            self.persist_bans();
            return Ok(CycleOutcome::Refreshed(SourceKind::Cdn));
        }

        // 4. Seed nodes, in order; first valid snapshot wins.
        if let Some((seed, snapshot)) = self.acquire_from_seeds().await {
            self.merge_snapshot(&snapshot)?;
            self.update_meta(&snapshot);
            self.persist_current()?;
            self.persist_bans();
            info!(seed = %seed, "checkpoints refreshed from seed node");
            return Ok(CycleOutcome::Refreshed(SourceKind::Seed));
        }

        // 5. Everything failed: explicit, auditable fail-open.
        self.persist_bans();
        error!(
            "checkpoint acquisition FAILED on every source (CDN and all seeds); \
             the node will synchronize WITHOUT fresh checkpoint protection. \
             Check connectivity and seed node health, then restart or await \
             the next refresh cycle"
        );
        Ok(CycleOutcome::FailOpen)
    }

    /// Periodic refresh loop. Never returns; run it in its own task.
    pub async fn run(&self) {
        loop {
            sleep(self.config.refresh_interval).await;
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "periodic checkpoint refresh failed");
            }
        }
    }

    /// Fetch and fully validate the CDN snapshot. `None` means fall
    /// through to the seeds.
    async fn acquire_from_cdn(&self) -> Option<CheckpointSnapshot> {
        let url = self.config.cdn_url.clone();
        info!(url = %url, "attempting checkpoint download from CDN");

        let raw = match self.fetcher.fetch(&url, self.config.cdn_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(url = %url, error = %e, "CDN unavailable, falling back to seed nodes");
                return None;
            }
        };
        let snapshot = match raw.validate(self.config.network) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(url = %url, error = %e, "CDN snapshot malformed");
                self.penalize(&url, BanReason::HashMismatch);
                return None;
            }
        };
        if !raw.has_epoch() {
            warn!(url = %url, "CDN snapshot missing epoch_id, rejected for replay protection");
            self.penalize(&url, BanReason::EpochViolation);
            return None;
        }
        if !self.epochs.lock().validate(&url, snapshot.epoch_id) {
            warn!(
                url = %url,
                epoch = snapshot.epoch_id,
                "stale epoch from CDN: possible replay attack"
            );
            self.penalize(&url, BanReason::ReplayAttack);
            return None;
        }
        if !snapshot.genesis_matches() {
            error!(url = %url, "CDN snapshot contradicts the hardcoded genesis, rejected");
            self.penalize(&url, BanReason::SeedMismatch);
            return None;
        }
        if !self
            .quorum
            .verify(self.config.network, snapshot.epoch_id, &self.ledger)
            .await
        {
            self.penalize(&url, BanReason::SeedMismatch);
            return None;
        }

        self.credit(&url, snapshot.epoch_id);
        info!(
            url = %url,
            pins = snapshot.pins.len(),
            epoch = snapshot.epoch_id,
            "CDN snapshot verified"
        );
        Some(snapshot)
    }

    /// Try each seed in order; return the first structurally valid,
    /// epoch-valid, genesis-valid snapshot.
    pub(crate) async fn acquire_from_seeds(&self) -> Option<(String, CheckpointSnapshot)> {
        info!("fallback: loading checkpoints from seed nodes");

        for seed in &self.config.seed_urls {
            if self.ledger.lock().is_banned(seed) {
                warn!(seed, "banned seed skipped");
                continue;
            }
            let raw = match self.fetcher.fetch(seed, self.config.seed_timeout).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(seed, error = %e, "seed unavailable");
                    continue;
                }
            };
            let snapshot = match raw.validate(self.config.network) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(seed, error = %e, "seed snapshot malformed");
                    self.penalize(seed, BanReason::HashMismatch);
                    continue;
                }
            };
            if !raw.has_epoch() {
                warn!(seed, "seed snapshot missing epoch_id, rejecting this seed");
                self.penalize(seed, BanReason::EpochViolation);
                continue;
            }
            if !self.epochs.lock().validate(seed, snapshot.epoch_id) {
                warn!(
                    seed,
                    epoch = snapshot.epoch_id,
                    "stale epoch from seed, trying next"
                );
                self.penalize(seed, BanReason::ReplayAttack);
                continue;
            }
            if !snapshot.genesis_matches() {
                error!(seed, "seed serves an obsolete genesis block, rejecting");
                self.penalize(seed, BanReason::SeedMismatch);
                continue;
            }

            self.credit(seed, snapshot.epoch_id);
            return Some((seed.clone(), snapshot));
        }

        error!("no seed node yielded a valid checkpoint snapshot");
        None
    }

    /// Merge a verified snapshot's pins into the store. Merges are
    /// serialized by the store mutex; a differing hash at a pinned height
    /// is a hard conflict.
    pub fn merge_snapshot(&self, snapshot: &CheckpointSnapshot) -> Result<usize, LynxError> {
        let mut store = self.store.lock();
        let mut added = 0usize;
        for pin in &snapshot.pins {
            let known = store.hash_at(pin.height).is_some();
            store.add(pin.height, pin.hash)?;
            if !known {
                added += 1;
            }
        }
        debug!(added, total = store.len(), "snapshot pins merged");
        Ok(added)
    }

    /// Remember the accepted envelope metadata for persistence.
    pub(crate) fn update_meta(&self, snapshot: &CheckpointSnapshot) {
        let mut meta = self.meta.lock();
        meta.epoch_id = snapshot.epoch_id;
        meta.checkpoint_interval = if snapshot.checkpoint_interval == 0 {
            CHECKPOINT_INTERVAL
        } else {
            snapshot.checkpoint_interval
        };
        meta.generated_at = snapshot.generated_at;
    }

    /// Write the current store back to the local checkpoint file.
    pub fn persist_current(&self) -> Result<(), LynxError> {
        let raw = {
            let store = self.store.lock();
            let meta = self.meta.lock();
            let generated_at = if meta.generated_at == 0 {
                unix_now()
            } else {
                meta.generated_at
            };
            RawSnapshot::from_store(
                &store,
                self.config.network,
                meta.checkpoint_interval,
                meta.epoch_id,
                generated_at,
            )
        };
        persist::write_local_snapshot(&self.config.checkpoint_file(), &raw)
    }

    /// Write the permanent-ban set to disk; failures are non-critical.
    pub(crate) fn persist_bans(&self) {
        if let Err(e) = self
            .ledger
            .lock()
            .save_permanent_bans(&self.config.ban_file())
        {
            warn!(error = %e, "failed to persist permanent bans");
        }
    }

    /// Record a violation for `source`; activates quarantine when the
    /// violation threshold is crossed.
    pub(crate) fn penalize(&self, source: &str, reason: BanReason) {
        let effect = self.ledger.lock().record_violation(source, reason);
        if effect.quarantine_threshold_reached {
            self.quarantine.lock().activate(0, QUARANTINE_DEFAULT_SECS);
        }
    }

    /// Record a valid outcome and the accepted epoch for `source`.
    fn credit(&self, source: &str, epoch: u64) {
        let mut ledger = self.ledger.lock();
        ledger.record_outcome(source, true);
        ledger.note_epoch(source, epoch);
    }
}
