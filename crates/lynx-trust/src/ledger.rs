//! Per-source violation tracking and tiered bans.
//!
//! Every checkpoint source (CDN URL, seed URL, or peer id) accumulates a
//! violation count. Punishment is immediate: each invalid outcome increments
//! the counter and may escalate the ban tier. Forgiveness is gradual: each
//! valid outcome decrements the counter by one, down to zero, so trust is
//! regained only through sustained good behaviour.
//!
//! Permanent bans survive restarts via a JSON file; the timed tiers expire
//! on their own and are never persisted.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lynx_core::constants::{
    NEUTRAL_SCORE, PERMANENT_BAN_VIOLATIONS, PERSISTENT_BAN_VIOLATIONS,
    QUARANTINE_VIOLATION_THRESHOLD, SCORE_FLOOR, TEMP_BAN_VIOLATIONS, TRUST_THRESHOLD,
    VIOLATION_SCORE_STEP,
};
use lynx_core::error::LedgerError;
use lynx_core::time::unix_now;

/// Ban severity tiers, ordered by escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BanLevel {
    /// Not banned.
    #[default]
    None,
    /// Banned for one hour.
    Temp1h,
    /// Banned for 24 hours.
    Persistent24h,
    /// Banned until manually removed; persisted across restarts.
    Permanent,
}

impl BanLevel {
    /// How long this tier lasts. `None` for the unbounded tiers.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::None => Some(Duration::ZERO),
            Self::Temp1h => Some(Duration::from_secs(3600)),
            Self::Persistent24h => Some(Duration::from_secs(86400)),
            Self::Permanent => None,
        }
    }

    /// Numeric code used in the persisted ban file.
    pub fn code(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Temp1h => 1,
            Self::Persistent24h => 2,
            Self::Permanent => 3,
        }
    }

    /// Inverse of [`BanLevel::code`]. Unknown codes map to `None`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Temp1h,
            2 => Self::Persistent24h,
            3 => Self::Permanent,
            _ => Self::None,
        }
    }
}

/// Why a source was banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BanReason {
    #[default]
    None,
    /// Checkpoint hash disagrees with the verified set.
    HashMismatch,
    /// Presented a non-monotonic epoch.
    EpochViolation,
    /// Replayed an old, once-valid snapshot.
    ReplayAttack,
    /// Served a structurally impossible height.
    InvalidHeight,
    /// Failed seed quorum verification.
    SeedMismatch,
}

impl BanReason {
    /// Name used in the persisted ban file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::EpochViolation => "EPOCH_VIOLATION",
            Self::ReplayAttack => "REPLAY_ATTACK",
            Self::InvalidHeight => "INVALID_HEIGHT",
            Self::SeedMismatch => "SEED_MISMATCH",
        }
    }

    /// Inverse of [`BanReason::as_str`]. Unknown names map to `None`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "HASH_MISMATCH" => Self::HashMismatch,
            "EPOCH_VIOLATION" => Self::EpochViolation,
            "REPLAY_ATTACK" => Self::ReplayAttack,
            "INVALID_HEIGHT" => Self::InvalidHeight,
            "SEED_MISMATCH" => Self::SeedMismatch,
            _ => Self::None,
        }
    }
}

/// Per-source ban and violation state.
#[derive(Debug, Clone, Default)]
pub struct SourceBanRecord {
    /// Current ban tier.
    pub level: BanLevel,
    /// Reason for the current tier.
    pub reason: BanReason,
    /// Rule violations observed; decremented by valid outcomes, floor 0.
    pub violation_count: i32,
    /// Last epoch accepted from this source.
    pub last_epoch_seen: u64,
    /// Unix time the current ban was issued (persisted for permanents).
    pub ban_timestamp: u64,
    /// In-process anchor for the timed tiers.
    banned_at: Option<Instant>,
}

/// What a call to [`ReputationLedger::record_outcome`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeEffect {
    /// Violation count after the outcome was applied.
    pub violation_count: i32,
    /// The tier the source escalated to with this outcome, if it changed.
    pub escalated_to: Option<BanLevel>,
    /// True when the count has reached the node-wide quarantine threshold.
    /// The caller is responsible for activating the quarantine controller.
    pub quarantine_threshold_reached: bool,
}

/// One entry of the persisted ban file.
#[derive(Serialize, Deserialize)]
struct PersistedBan {
    peer: String,
    failures: i32,
    ban_level: u8,
    reason: String,
    last_epoch_seen: u64,
    ban_timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct BanFile {
    banned_peers: Vec<PersistedBan>,
}

/// Tracks violations, ban tiers, and derived trust per source.
///
/// Pure in-memory state guarded by the owner's mutex; the persistence
/// methods do file I/O and must be called outside any critical section.
#[derive(Debug, Default)]
pub struct ReputationLedger {
    records: HashMap<String, SourceBanRecord>,
    permanent: HashSet<String>,
}

impl ReputationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validation outcome for `source`.
    ///
    /// Invalid outcomes increment the violation count and may escalate the
    /// ban tier; valid outcomes decrement it (floor 0) without ever
    /// lowering an already-issued tier.
    pub fn record_outcome(&mut self, source: &str, valid: bool) -> OutcomeEffect {
        if valid {
            let record = self.records.entry(source.to_string()).or_default();
            if record.violation_count > 0 {
                record.violation_count -= 1;
                debug!(
                    source,
                    violations = record.violation_count,
                    "ledger: valid outcome, violation count decremented"
                );
            }
            return OutcomeEffect {
                violation_count: record.violation_count,
                escalated_to: None,
                quarantine_threshold_reached: false,
            };
        }
        self.record_violation(source, BanReason::HashMismatch)
    }

    /// Record a violation with its precise reason.
    ///
    /// Same counting and escalation as an invalid [`Self::record_outcome`],
    /// but the given reason is attached when the source escalates.
    pub fn record_violation(&mut self, source: &str, reason: BanReason) -> OutcomeEffect {
        let record = self.records.entry(source.to_string()).or_default();

        record.violation_count = record.violation_count.saturating_add(1);
        warn!(
            source,
            violations = record.violation_count,
            reason = reason.as_str(),
            "ledger: violation recorded"
        );

        let target = tier_for_violations(record.violation_count);
        let escalated_to = if target > record.level {
            record.level = target;
            if record.reason == BanReason::None {
                record.reason = reason;
            }
            record.ban_timestamp = unix_now();
            record.banned_at = Some(Instant::now());
            if target == BanLevel::Permanent {
                self.permanent.insert(source.to_string());
            }
            warn!(source, level = ?target, "ledger: source escalated");
            Some(target)
        } else {
            None
        };

        OutcomeEffect {
            violation_count: record.violation_count,
            escalated_to,
            quarantine_threshold_reached: record.violation_count
                >= QUARANTINE_VIOLATION_THRESHOLD,
        }
    }

    /// Issue an explicit ban at the given tier.
    ///
    /// Never lowers an existing tier. Permanent bans are added to the
    /// durable set; the caller should persist afterwards.
    pub fn ban(&mut self, source: &str, reason: BanReason, level: BanLevel) {
        let record = self.records.entry(source.to_string()).or_default();
        if level < record.level {
            debug!(source, current = ?record.level, requested = ?level, "ledger: keeping stricter existing ban");
            return;
        }
        record.level = level;
        record.reason = reason;
        record.ban_timestamp = unix_now();
        record.banned_at = Some(Instant::now());
        if level == BanLevel::Permanent {
            self.permanent.insert(source.to_string());
        }
        warn!(source, ?level, reason = reason.as_str(), "ledger: source banned");
    }

    /// Whether `source` is currently banned.
    ///
    /// Permanent bans always hold; timed tiers hold while their window has
    /// not elapsed.
    pub fn is_banned(&self, source: &str) -> bool {
        if self.permanent.contains(source) {
            return true;
        }
        let Some(record) = self.records.get(source) else {
            return false;
        };
        match (record.level.duration(), record.banned_at) {
            (Some(window), Some(banned_at)) => banned_at.elapsed() < window,
            // Permanent handled above; a tier without an anchor is stale
            // state loaded from disk and treated as expired.
            (None, _) => true,
            (_, None) => false,
        }
    }

    /// Derived trust score in [0.1, 1.0]; unknown sources are neutral 0.5.
    pub fn score(&self, source: &str) -> f32 {
        let Some(record) = self.records.get(source) else {
            return NEUTRAL_SCORE;
        };
        (1.0 - record.violation_count as f32 * VIOLATION_SCORE_STEP).clamp(SCORE_FLOOR, 1.0)
    }

    /// Whether `source` is trusted: not banned and scoring at least
    /// `threshold` (see `TRUST_THRESHOLD` for the default).
    pub fn is_trusted(&self, source: &str, threshold: f32) -> bool {
        !self.is_banned(source) && self.score(source) >= threshold
    }

    /// Convenience wrapper using the default trust threshold.
    pub fn is_trusted_default(&self, source: &str) -> bool {
        self.is_trusted(source, TRUST_THRESHOLD)
    }

    /// Record the epoch accepted from `source` (for the persisted record).
    pub fn note_epoch(&mut self, source: &str, epoch: u64) {
        self.records
            .entry(source.to_string())
            .or_default()
            .last_epoch_seen = epoch;
    }

    /// Current violation count for `source` (0 if unknown).
    pub fn violation_count(&self, source: &str) -> i32 {
        self.records
            .get(source)
            .map(|r| r.violation_count)
            .unwrap_or(0)
    }

    /// Snapshot of the record for `source`, if any.
    pub fn record(&self, source: &str) -> Option<SourceBanRecord> {
        self.records.get(source).cloned()
    }

    /// Lift timed bans whose window has elapsed. Returns the sources whose
    /// bans were lifted.
    pub fn unban_expired(&mut self) -> Vec<String> {
        let mut lifted = Vec::new();
        for (source, record) in self.records.iter_mut() {
            if record.level == BanLevel::None || record.level == BanLevel::Permanent {
                continue;
            }
            let expired = match (record.level.duration(), record.banned_at) {
                (Some(window), Some(banned_at)) => banned_at.elapsed() >= window,
                _ => true,
            };
            if expired {
                record.level = BanLevel::None;
                record.banned_at = None;
                info!(source = %source, "ledger: timed ban expired");
                lifted.push(source.clone());
            }
        }
        lifted
    }

    /// All currently banned sources (permanent plus unexpired timed).
    pub fn banned_sources(&self) -> Vec<String> {
        self.records
            .keys()
            .filter(|source| self.is_banned(source))
            .cloned()
            .collect()
    }

    /// Write the permanent-ban set to `path` as JSON.
    ///
    /// Call on every ban mutation, outside any lock.
    pub fn save_permanent_bans(&self, path: &Path) -> Result<(), LedgerError> {
        let banned_peers = self
            .permanent
            .iter()
            .map(|source| {
                let record = self.records.get(source).cloned().unwrap_or_default();
                PersistedBan {
                    peer: source.clone(),
                    failures: record.violation_count,
                    ban_level: record.level.code(),
                    reason: record.reason.as_str().to_string(),
                    last_epoch_seen: record.last_epoch_seen,
                    ban_timestamp: record.ban_timestamp,
                }
            })
            .collect();

        let text = serde_json::to_string_pretty(&BanFile { banned_peers })
            .map_err(|e| LedgerError::Json(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| LedgerError::Io(e.to_string()))?;
        debug!(?path, count = self.permanent.len(), "ledger: permanent bans saved");
        Ok(())
    }

    /// Load the permanent-ban set from `path`.
    ///
    /// A missing file is not an error (first start). Returns the number of
    /// bans loaded.
    pub fn load_permanent_bans(&mut self, path: &Path) -> Result<usize, LedgerError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "ledger: no ban file yet");
                return Ok(0);
            }
            Err(e) => return Err(LedgerError::Io(e.to_string())),
        };
        let file: BanFile =
            serde_json::from_str(&text).map_err(|e| LedgerError::Json(e.to_string()))?;

        let count = file.banned_peers.len();
        for entry in file.banned_peers {
            let record = SourceBanRecord {
                level: BanLevel::from_code(entry.ban_level),
                reason: BanReason::from_name(&entry.reason),
                violation_count: entry.failures,
                last_epoch_seen: entry.last_epoch_seen,
                ban_timestamp: entry.ban_timestamp,
                banned_at: None,
            };
            self.permanent.insert(entry.peer.clone());
            self.records.insert(entry.peer, record);
        }
        info!(?path, count, "ledger: permanent bans loaded");
        Ok(count)
    }

    #[cfg(test)]
    fn backdate_ban(&mut self, source: &str, age: Duration) {
        if let Some(record) = self.records.get_mut(source) {
            record.banned_at = Some(Instant::now() - age);
        }
    }
}

/// Ban tier warranted by a violation count.
fn tier_for_violations(count: i32) -> BanLevel {
    if count >= PERMANENT_BAN_VIOLATIONS {
        BanLevel::Permanent
    } else if count >= PERSISTENT_BAN_VIOLATIONS {
        BanLevel::Persistent24h
    } else if count >= TEMP_BAN_VIOLATIONS {
        BanLevel::Temp1h
    } else {
        BanLevel::None
    }
}
