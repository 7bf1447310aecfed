//! End-to-end tests: the full acquisition pipeline driven through its
//! public API with a scripted fetcher, plus pipeline/protocol integration.

use std::sync::Arc;

use lynx_core::constants::{Network, ALERT_DIR_NAME, QUARANTINE_VIOLATION_THRESHOLD};
use lynx_core::error::TransportError;
use lynx_core::snapshot::RawSnapshot;
use lynx_core::store::CheckResult;
use lynx_core::time::unix_now;
use lynx_trust::ledger::{BanLevel, BanReason};
use lynx_trust::protocol::SecurityProtocol;
use lynx_trust::query::{AttackType, SecurityResponse};
use lynx_sync::{CheckpointService, CycleOutcome, SourceKind};

use lynx_tests::helpers::{pin_hash, snapshot, test_config, ScriptedFetcher, CDN, SEEDS};

fn service(dir: &tempfile::TempDir, fetcher: ScriptedFetcher) -> CheckpointService {
    CheckpointService::new(test_config(dir.path()), Arc::new(fetcher))
}

// ---------------------------------------------------------------------------
// The ordered fallback chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cdn_preferred_when_available_and_quorum_backed() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new()
        .with(CDN, Ok(snapshot(Network::Mainnet, 8, &[(30, pin_hash(1)), (60, pin_hash(2))])))
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 8, &[])));

    let service = service(&dir, fetcher);
    let outcome = service.startup().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Refreshed(SourceKind::Cdn));

    let store = service.store();
    let store = store.lock();
    assert_eq!(store.len(), 3); // genesis + two pins
    assert_eq!(store.max_height(), 60);
    assert!(store.is_in_checkpoint_zone(45));
    assert!(!store.is_in_checkpoint_zone(61));
}

#[tokio::test]
async fn seed_order_is_respected_on_fallback() {
    let dir = tempfile::tempdir().unwrap();
    // CDN down; seed A malformed; seed B valid; seed C also valid but
    // must never be consulted once B succeeds.
    let mut broken = snapshot(Network::Mainnet, 3, &[(30, pin_hash(7))]);
    broken.hashlines[1].hash = "zz".to_string();

    let fetcher = ScriptedFetcher::new()
        .with(CDN, Err(TransportError::Timeout))
        .with(SEEDS[0], Ok(broken))
        .with(SEEDS[1], Ok(snapshot(Network::Mainnet, 3, &[(30, pin_hash(8))])))
        .with(SEEDS[2], Ok(snapshot(Network::Mainnet, 3, &[(30, pin_hash(9))])));

    let service = service(&dir, fetcher);
    let outcome = service.startup().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Refreshed(SourceKind::Seed));
    // Seed B's pin won; seed C's differing pin was never merged.
    assert_eq!(service.store().lock().hash_at(30), Some(pin_hash(8)));
    // The malformed seed was penalized.
    assert_eq!(service.ledger().lock().violation_count(SEEDS[0]), 1);
}

#[tokio::test]
async fn total_outage_fails_open_and_next_cycle_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new()
        // First cycle: CDN errors. Second cycle: CDN valid.
        .with(CDN, Err(TransportError::Status(503)))
        .with(CDN, Ok(snapshot(Network::Mainnet, 2, &[(30, pin_hash(5))])))
        // Seeds stay down for the first cycle; seed A later confirms.
        .with(SEEDS[0], Err(TransportError::Timeout))
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 2, &[])));

    let service = service(&dir, fetcher);
    let outcome = service.startup().await.unwrap();
    assert_eq!(outcome, CycleOutcome::FailOpen);
    assert_eq!(service.store().lock().len(), 1, "genesis only after outage");

    // The periodic refresh runs another cycle and recovers.
    let outcome = service.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Refreshed(SourceKind::Cdn));
    assert_eq!(service.store().lock().hash_at(30), Some(pin_hash(5)));
}

// ---------------------------------------------------------------------------
// Corruption: fail-closed end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sixty_three_char_hash_pauses_then_recovers_without_inserting() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    // Local file whose non-genesis hash is 63 characters long.
    let mut corrupt = snapshot(Network::Mainnet, 4, &[(30, pin_hash(1))]);
    corrupt.hashlines[1].hash.pop();
    assert_eq!(corrupt.hashlines[1].hash.len(), 63);
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(
        config.checkpoint_file(),
        serde_json::to_string_pretty(&corrupt).unwrap(),
    )
    .unwrap();

    // Seeds recover on the second pause-loop attempt.
    let fetcher = ScriptedFetcher::new()
        .with(SEEDS[0], Err(TransportError::Timeout))
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 5, &[(30, pin_hash(2))])));

    let service = CheckpointService::new(config, Arc::new(fetcher));
    let outcome = service.startup().await.unwrap();
    assert_eq!(outcome, CycleOutcome::RepairedFromSeeds);

    // The corrupt pin never made it in; the verified one did.
    let store = service.store();
    assert_eq!(store.lock().hash_at(30), Some(pin_hash(2)));

    // The file on disk is now the repaired snapshot.
    let text = std::fs::read_to_string(service.config().checkpoint_file()).unwrap();
    let reloaded = RawSnapshot::from_json(&text).unwrap();
    assert!(reloaded.validate(Network::Mainnet).is_ok());
    assert_eq!(reloaded.epoch_id, 5);

    // An incident report was written.
    let alerts = dir.path().join(ALERT_DIR_NAME);
    assert!(alerts.read_dir().unwrap().next().is_some());
}

// ---------------------------------------------------------------------------
// The validator-facing surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn block_validation_gates_work_against_acquired_pins() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new()
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 1, &[(30, pin_hash(3)), (90, pin_hash(4))])));

    let service = service(&dir, fetcher);
    service.startup().await.unwrap();

    let store = service.store();
    let store = store.lock();

    // A candidate block at a pinned height must match exactly.
    assert_eq!(store.check(30, &pin_hash(3)), CheckResult::Match);
    assert_eq!(store.check(30, &pin_hash(9)), CheckResult::Mismatch);
    assert_eq!(store.check(31, &pin_hash(9)), CheckResult::NotACheckpoint);

    // Fork gating below the checkpoint frontier.
    assert!(!store.alt_block_allowed(100, 85), "unwinds the pin at 90");
    assert!(store.alt_block_allowed(100, 95));
    assert!(!store.alt_block_allowed(100, 0), "genesis never replaceable");
}

// ---------------------------------------------------------------------------
// Ban persistence across restarts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permanently_banned_seed_is_skipped_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First run: ban seed A permanently; the cycle persists the ban file.
    let fetcher = ScriptedFetcher::new()
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 1, &[(30, pin_hash(1))])));
    let first = service(&dir, fetcher);
    first
        .ledger()
        .lock()
        .ban(SEEDS[0], BanReason::SeedMismatch, BanLevel::Permanent);
    let outcome = first.startup().await.unwrap();
    // Seed A is banned, so nothing was available.
    assert_eq!(outcome, CycleOutcome::FailOpen);
    assert!(first.config().ban_file().exists());

    // Restart: seed A would serve a snapshot, but the restored ban wins;
    // seed B supplies the data instead.
    let fetcher = ScriptedFetcher::new()
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 2, &[(30, pin_hash(6))])))
        .with(SEEDS[1], Ok(snapshot(Network::Mainnet, 2, &[(30, pin_hash(7))])));
    let second = service(&dir, fetcher);
    let outcome = second.startup().await.unwrap();

    assert_eq!(outcome, CycleOutcome::Refreshed(SourceKind::Seed));
    assert_eq!(second.store().lock().hash_at(30), Some(pin_hash(7)));
    assert!(second.ledger().lock().is_banned(SEEDS[0]));
}

// ---------------------------------------------------------------------------
// Protocol + pipeline integration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn peer_disagreement_quarantines_and_freezes_acquisition() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new()
        .with(CDN, Ok(snapshot(Network::Mainnet, 1, &[(30, pin_hash(1))])))
        .with(SEEDS[0], Ok(snapshot(Network::Mainnet, 1, &[])));

    let service = service(&dir, fetcher);
    service.startup().await.unwrap();

    let protocol = SecurityProtocol::new("local-node", service.ledger(), service.quarantine());
    let query = protocol
        .initiate(30, pin_hash(1), pin_hash(9), CDN, AttackType::HashMismatch)
        .unwrap();

    // A hostile peer denies the local view repeatedly until the node
    // quarantines itself.
    for i in 0..QUARANTINE_VIOLATION_THRESHOLD {
        protocol.handle_response(SecurityResponse {
            query_id: query.query_id.clone(),
            node_id: format!("hostile-{i}"),
            height: 30,
            matches_local: false,
            height_hash: Some(pin_hash(9)),
            timestamp: unix_now(),
        });
        // Concentrate violations on one identity to cross the threshold.
        protocol.handle_response(SecurityResponse {
            query_id: query.query_id.clone(),
            node_id: "hostile-0".to_string(),
            height: 30,
            matches_local: false,
            height_hash: Some(pin_hash(9)),
            timestamp: unix_now(),
        });
    }

    assert!(service.quarantine().lock().is_active());

    // Under quarantine: no new snapshots and no new queries.
    let outcome = service.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::QuarantineRefused);
    assert!(protocol
        .initiate(60, pin_hash(1), pin_hash(2), CDN, AttackType::HashMismatch)
        .is_none());
}

#[tokio::test]
async fn honest_majority_confirms_network_attack() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&dir, ScriptedFetcher::new());
    service.bootstrap_genesis().unwrap();

    let protocol = SecurityProtocol::new("local-node", service.ledger(), service.quarantine());
    let query = protocol
        .initiate(30, pin_hash(1), pin_hash(9), "seed-x", AttackType::SeedMismatch)
        .unwrap();

    for (node, matches) in [("p1", true), ("p2", true), ("p3", false)] {
        protocol.handle_response(SecurityResponse {
            query_id: query.query_id.clone(),
            node_id: node.to_string(),
            height: 30,
            matches_local: matches,
            height_hash: None,
            timestamp: unix_now(),
        });
    }

    let consensus = protocol.consensus(&query.query_id).unwrap();
    assert!(consensus.is_confirmed);
    assert_eq!(consensus.confirmations, 2);
    assert_eq!(consensus.denials, 1);

    // Responders who agreed kept clean records; the denier was penalized.
    let ledger = service.ledger();
    let ledger = ledger.lock();
    assert_eq!(ledger.violation_count("p1"), 0);
    assert_eq!(ledger.violation_count("p3"), 1);
}
