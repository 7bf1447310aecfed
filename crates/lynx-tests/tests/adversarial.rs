//! Adversarial test suite for the checkpoint trust layer.
//!
//! These tests attack protocol invariants directly:
//! - Replay of stale snapshots (epoch monotonicity)
//! - Checkpoint overwrite attempts (conflict rejection)
//! - Reputation manipulation (score bounds, asymmetric forgiveness)
//! - Forged quorum (banned seeds, foreign genesis)
//! - Consensus gaming (threshold and count gates, late responses)
//! - Quarantine lifecycle under sustained disagreement

use proptest::prelude::*;

use lynx_core::constants::{QUARANTINE_VIOLATION_THRESHOLD, SCORE_FLOOR, TRUST_THRESHOLD};
use lynx_core::epoch::EpochValidator;
use lynx_core::store::{CheckResult, CheckpointStore};
use lynx_core::time::unix_now;
use lynx_core::types::Hash256;
use lynx_trust::ledger::{BanLevel, BanReason, ReputationLedger};
use lynx_trust::quarantine::QuarantineController;
use lynx_trust::query::{calculate_consensus, SecurityResponse};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn response(node: &str, matches: bool) -> SecurityResponse {
    SecurityResponse {
        query_id: "q".to_string(),
        node_id: node.to_string(),
        height: 90,
        matches_local: matches,
        height_hash: None,
        timestamp: unix_now(),
    }
}

// ---------------------------------------------------------------------------
// Replay monotonicity
// ---------------------------------------------------------------------------

proptest! {
    /// For any e2 <= e1, a source that presented e1 cannot present e2,
    /// and the failed attempt never updates the recorded epoch.
    #[test]
    fn replayed_epoch_always_rejected(e1 in 1u64..u64::MAX, delta in 0u64..1000) {
        let e2 = e1.saturating_sub(delta);
        let mut validator = EpochValidator::new();
        prop_assert!(validator.validate("source", e1));
        prop_assert!(!validator.validate("source", e2));
        prop_assert_eq!(validator.last_epoch("source"), Some(e1));
    }

    /// An attacker controlling one source identity cannot poison the
    /// epoch state of another.
    #[test]
    fn epoch_state_is_per_source(epoch in 1u64..1_000_000) {
        let mut validator = EpochValidator::new();
        prop_assert!(validator.validate("honest", epoch));
        prop_assert!(validator.validate("attacker", epoch));
        prop_assert!(!validator.validate("attacker", epoch));
        prop_assert_eq!(validator.last_epoch("honest"), Some(epoch));
    }
}

// ---------------------------------------------------------------------------
// Conflict rejection
// ---------------------------------------------------------------------------

proptest! {
    /// For any height, inserting hash A then B != A must fail and leave
    /// the store holding A.
    #[test]
    fn checkpoint_overwrite_always_rejected(height in 0u64..1_000_000, a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        prop_assume!(a != b);
        let mut store = CheckpointStore::new();
        store.add(height, Hash256(a)).unwrap();
        prop_assert!(store.add(height, Hash256(b)).is_err());
        prop_assert_eq!(store.hash_at(height), Some(Hash256(a)));
        prop_assert_eq!(store.check(height, &Hash256(a)), CheckResult::Match);
        prop_assert_eq!(store.check(height, &Hash256(b)), CheckResult::Mismatch);
    }
}

// ---------------------------------------------------------------------------
// Reputation bounds and asymmetry
// ---------------------------------------------------------------------------

proptest! {
    /// Score never leaves [0.1, 1.0] under any outcome sequence, and an
    /// unknown source is exactly neutral.
    #[test]
    fn ledger_score_bounded_under_any_history(outcomes in proptest::collection::vec(any::<bool>(), 1..300)) {
        let mut ledger = ReputationLedger::new();
        for valid in &outcomes {
            ledger.record_outcome("s", *valid);
            let score = ledger.score("s");
            prop_assert!((SCORE_FLOOR..=1.0).contains(&score));
        }
    }
}

#[test]
fn all_valid_history_converges_to_one() {
    let mut ledger = ReputationLedger::new();
    for _ in 0..100 {
        ledger.record_outcome("s", true);
    }
    assert_eq!(ledger.score("s"), 1.0);
}

#[test]
fn all_invalid_history_converges_to_floor_never_zero() {
    let mut ledger = ReputationLedger::new();
    for _ in 0..100 {
        ledger.record_outcome("s", false);
    }
    assert_eq!(ledger.score("s"), SCORE_FLOOR);
    assert!(ledger.score("s") > 0.0);
}

/// Trust lost in one violation takes one good outcome to repair, but a
/// burst of violations cannot be erased by a single valid response.
#[test]
fn forgiveness_is_gradual() {
    let mut ledger = ReputationLedger::new();
    for _ in 0..4 {
        ledger.record_outcome("s", false);
    }
    let burned = ledger.score("s");
    ledger.record_outcome("s", true);
    let after_one_good = ledger.score("s");
    assert!(after_one_good > burned);
    assert!(
        after_one_good < TRUST_THRESHOLD,
        "one good outcome must not restore full trust"
    );
}

// ---------------------------------------------------------------------------
// Ban escalation and persistence
// ---------------------------------------------------------------------------

#[test]
fn sustained_violations_escalate_to_permanent_and_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ban_file = dir.path().join("permanent_bans.json");

    let mut ledger = ReputationLedger::new();
    let mut reached_permanent = false;
    for _ in 0..20 {
        let effect = ledger.record_violation("evil-seed", BanReason::ReplayAttack);
        if effect.escalated_to == Some(BanLevel::Permanent) {
            reached_permanent = true;
        }
    }
    assert!(reached_permanent);
    ledger.save_permanent_bans(&ban_file).unwrap();

    // Simulated restart: a fresh ledger restores the permanent ban.
    let mut restarted = ReputationLedger::new();
    restarted.load_permanent_bans(&ban_file).unwrap();
    assert!(restarted.is_banned("evil-seed"));
    assert!(!restarted.is_trusted_default("evil-seed"));
}

#[test]
fn quarantine_trigger_fires_at_the_violation_threshold() {
    let mut ledger = ReputationLedger::new();
    let mut quarantine = QuarantineController::new();

    for _ in 0..QUARANTINE_VIOLATION_THRESHOLD {
        let effect = ledger.record_outcome("attacker", false);
        if effect.quarantine_threshold_reached {
            quarantine.activate(90, 3600);
        }
    }
    assert!(quarantine.is_active());
}

// ---------------------------------------------------------------------------
// Consensus gaming
// ---------------------------------------------------------------------------

/// The worked example: 2 of 3 matching responses confirms at the default
/// thresholds.
#[test]
fn consensus_two_of_three_confirms() {
    let responses = vec![
        response("n1", true),
        response("n2", true),
        response("n3", false),
    ];
    let result = calculate_consensus(&responses, 0.66, 2);
    assert_eq!(result.confirmations, 2);
    assert_eq!(result.denials, 1);
    assert!((result.percentage - 0.667).abs() < 0.01);
    assert!(result.is_confirmed);
}

/// An attacker echoing a single confirmation cannot fake consensus: the
/// count gate holds even at 100% agreement.
#[test]
fn single_confirmation_never_confirms() {
    let result = calculate_consensus(&[response("n1", true)], 0.66, 2);
    assert!(!result.is_confirmed);
}

/// Packing the response set with malformed entries dilutes the ratio
/// rather than inflating it.
#[test]
fn malformed_responses_cannot_boost_consensus() {
    let mut forged = response("", true);
    forged.node_id.clear();
    let responses = vec![
        response("n1", true),
        response("n2", true),
        forged.clone(),
        forged.clone(),
        forged,
    ];
    let result = calculate_consensus(&responses, 0.66, 2);
    assert_eq!(result.errors, 3);
    // 2 confirmations / 5 responses = 40% < 66%.
    assert!(!result.is_confirmed);
}

proptest! {
    /// Consensus never confirms below the count gate, regardless of mix.
    #[test]
    fn consensus_count_gate_holds(denials in 0usize..20) {
        let mut responses = vec![response("n1", true)];
        for i in 0..denials {
            responses.push(response(&format!("d{i}"), false));
        }
        let result = calculate_consensus(&responses, 0.0, 2);
        prop_assert!(!result.is_confirmed);
    }
}

// ---------------------------------------------------------------------------
// Quarantine lifecycle
// ---------------------------------------------------------------------------

#[test]
fn quarantine_activation_is_idempotent_while_active() {
    let mut quarantine = QuarantineController::new();
    quarantine.activate(100, 3600);
    assert!(quarantine.is_active());

    // Second activation while active must not restart the clock.
    let remaining_before = quarantine.remaining().unwrap();
    quarantine.activate(200, 21600);
    assert!(quarantine.remaining().unwrap() <= remaining_before);
}
