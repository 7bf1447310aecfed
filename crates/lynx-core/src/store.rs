//! In-memory container for accepted checkpoint pins.
//!
//! A checkpoint pins a known-good block hash to a height so that reorgs
//! below the checkpoint frontier can be rejected outright.
//!
//! # Attack vectors
//!
//! - **Silent overwrite:** an attacker who can slip a second hash in at an
//!   already-pinned height would redefine history. [`CheckpointStore::add`]
//!   therefore fails loudly on any differing hash instead of overwriting,
//!   so callers can route into the conflict-repair flow.
//!
//! - **Long-range rewrite:** [`CheckpointStore::alt_block_allowed`] rejects
//!   alternative chains that would unwind past a checkpoint.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::types::{CheckpointPin, Hash256};

/// Outcome of checking a block hash against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    /// No checkpoint exists at this height; any hash is acceptable.
    NotACheckpoint,
    /// A checkpoint exists and the hash matches it.
    Match,
    /// A checkpoint exists and the hash contradicts it.
    Mismatch,
}

/// Map of accepted (height -> hash) pins plus optional cumulative-difficulty
/// pins for the same heights.
///
/// Pure data structure: no I/O, no locking. Callers guard it with their own
/// mutex and keep critical sections short.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    points: BTreeMap<u64, Hash256>,
    difficulty_points: BTreeMap<u64, u128>,
}

impl CheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a checkpoint pin.
    ///
    /// Re-adding the identical pin is a no-op. Adding a *different* hash at
    /// an existing height is a hard conflict: the stored pin is kept and
    /// the call fails so the caller can escalate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the height is already pinned
    /// to a different hash.
    pub fn add(&mut self, height: u64, hash: Hash256) -> Result<(), StoreError> {
        if let Some(&existing) = self.points.get(&height) {
            if existing != hash {
                return Err(StoreError::Conflict {
                    height,
                    existing,
                    candidate: hash,
                });
            }
            return Ok(());
        }
        self.points.insert(height, hash);
        Ok(())
    }

    /// Add a checkpoint pin together with a cumulative-difficulty pin.
    ///
    /// The difficulty pin follows the same conflict rule as the hash pin.
    pub fn add_with_difficulty(
        &mut self,
        height: u64,
        hash: Hash256,
        difficulty: u128,
    ) -> Result<(), StoreError> {
        self.add(height, hash)?;
        if let Some(&existing) = self.difficulty_points.get(&height) {
            if existing != difficulty {
                return Err(StoreError::DifficultyConflict {
                    height,
                    existing,
                    candidate: difficulty,
                });
            }
            return Ok(());
        }
        self.difficulty_points.insert(height, difficulty);
        Ok(())
    }

    /// Check a block hash against the store.
    pub fn check(&self, height: u64, hash: &Hash256) -> CheckResult {
        match self.points.get(&height) {
            None => CheckResult::NotACheckpoint,
            Some(stored) if stored == hash => CheckResult::Match,
            Some(_) => CheckResult::Mismatch,
        }
    }

    /// Height of the highest checkpoint, or 0 if the store is empty.
    pub fn max_height(&self) -> u64 {
        self.points.keys().next_back().copied().unwrap_or(0)
    }

    /// The nearest checkpoint height at or below `height`, if any.
    pub fn nearest_at_or_below(&self, height: u64) -> Option<u64> {
        self.points.range(..=height).next_back().map(|(&h, _)| h)
    }

    /// True iff `height` is at or below the highest checkpoint.
    ///
    /// Inside the zone, block hashes at pinned heights must match exactly.
    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        !self.points.is_empty() && height <= self.max_height()
    }

    /// Whether an alternative (fork) block at `candidate_height` may be
    /// accepted given the current chain height.
    ///
    /// Allowed when the chain is still before the first checkpoint, or when
    /// the nearest checkpoint at or below `chain_height` is also below the
    /// candidate, i.e. accepting the block would not unwind a pin.
    /// Height 0 is never replaceable.
    pub fn alt_block_allowed(&self, chain_height: u64, candidate_height: u64) -> bool {
        if candidate_height == 0 {
            return false;
        }
        match self.nearest_at_or_below(chain_height) {
            None => true,
            Some(checkpoint_height) => checkpoint_height < candidate_height,
        }
    }

    /// True iff `other` pins a different hash at any height this store pins.
    pub fn conflicts_with(&self, other: &CheckpointStore) -> bool {
        other.points.iter().any(|(height, hash)| {
            self.points
                .get(height)
                .is_some_and(|stored| stored != hash)
        })
    }

    /// The stored hash at `height`, if pinned.
    pub fn hash_at(&self, height: u64) -> Option<Hash256> {
        self.points.get(&height).copied()
    }

    /// The stored cumulative difficulty at `height`, if pinned.
    pub fn difficulty_at(&self, height: u64) -> Option<u128> {
        self.difficulty_points.get(&height).copied()
    }

    /// Iterate all pins in height order.
    pub fn pins(&self) -> impl Iterator<Item = CheckpointPin> + '_ {
        self.points
            .iter()
            .map(|(&height, &hash)| CheckpointPin { height, hash })
    }

    /// Number of pins.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True iff the store holds no pins.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Remove the pin at `height` during repair. Returns the removed hash.
    pub fn erase(&mut self, height: u64) -> Option<Hash256> {
        self.difficulty_points.remove(&height);
        self.points.remove(&height)
    }

    /// Remove every pin. Used when the backing file is found corrupted.
    pub fn clear(&mut self) {
        self.points.clear();
        self.difficulty_points.clear();
    }
}
