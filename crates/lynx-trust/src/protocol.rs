//! Entry points of the peer security query protocol.
//!
//! [`SecurityProtocol`] wires the query registry to the reputation ledger
//! and the quarantine controller through injected handles, never through
//! statics, so tests can build isolated instances. The transport is a
//! collaborator: `initiate` returns the query for the caller to broadcast,
//! and `answer_query` builds the response the caller would send back.
//!
//! Responses are not cryptographically verified; the protocol trusts the
//! transport's peer authentication and lets reputation absorb dishonest
//! answers.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use lynx_core::constants::QUARANTINE_DEFAULT_SECS;
use lynx_core::store::{CheckResult, CheckpointStore};
use lynx_core::time::unix_now;
use lynx_core::types::Hash256;

use crate::ledger::ReputationLedger;
use crate::quarantine::QuarantineController;
use crate::query::{
    generate_query_id, AttackType, ConsensusResult, QueryManager, SecurityQuery, SecurityResponse,
};
use crate::reputation::{PeerReputationBook, REPORT_TRUST_THRESHOLD};

/// Peer-facing protocol state for one node.
pub struct SecurityProtocol {
    node_id: String,
    queries: Mutex<QueryManager>,
    ledger: Arc<Mutex<ReputationLedger>>,
    quarantine: Arc<Mutex<QuarantineController>>,
    /// Long-lived reporting history per peer; outlives individual queries.
    book: Mutex<PeerReputationBook>,
}

impl SecurityProtocol {
    /// Create a protocol instance sharing the given ledger and quarantine
    /// handles with the acquisition pipeline.
    pub fn new(
        node_id: impl Into<String>,
        ledger: Arc<Mutex<ReputationLedger>>,
        quarantine: Arc<Mutex<QuarantineController>>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            queries: Mutex::new(QueryManager::new()),
            ledger,
            quarantine,
            book: Mutex::new(PeerReputationBook::new()),
        }
    }

    /// Replace the reporting-history book, e.g. with one restored from
    /// disk at startup.
    pub fn with_book(mut self, book: PeerReputationBook) -> Self {
        self.book = Mutex::new(book);
        self
    }

    /// This node's identifier, as placed in outgoing queries.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Start a consensus query about a suspect hash.
    ///
    /// Returns the query to broadcast, or `None` when the node is
    /// quarantined (no outgoing queries under lockout) or `height` is 0
    /// (genesis is hardcoded and never queried).
    pub fn initiate(
        &self,
        height: u64,
        expected_hash: Hash256,
        reported_hash: Hash256,
        source: impl Into<String>,
        attack_type: AttackType,
    ) -> Option<SecurityQuery> {
        if height == 0 {
            warn!("query refused: height 0 is pinned by the hardcoded genesis");
            return None;
        }
        if self.quarantine.lock().is_active() {
            warn!(height, "query refused: node is quarantined");
            return None;
        }

        let query = SecurityQuery {
            query_id: generate_query_id(),
            height,
            expected_hash,
            reported_hash,
            source: source.into(),
            attack_type,
            reporting_node_id: self.node_id.clone(),
            timestamp: unix_now(),
            timeout_seconds: lynx_core::constants::QUERY_TIMEOUT_SECS,
        };
        self.queries.lock().add_query(query.clone());
        info!(
            query_id = %query.query_id,
            height,
            attack_type = ?attack_type,
            "security query initiated"
        );
        Some(query)
    }

    /// Process a query received from a peer.
    ///
    /// Acknowledges structurally valid, unexpired queries. The caller is
    /// responsible for sending back [`SecurityProtocol::answer_query`]'s
    /// response over its transport.
    pub fn handle_query(&self, query: &SecurityQuery) -> bool {
        if query.height == 0 || query.reporting_node_id.is_empty() {
            warn!(query_id = %query.query_id, "malformed security query dropped");
            return false;
        }
        let age = unix_now().saturating_sub(query.timestamp);
        if age > query.timeout_seconds {
            debug!(query_id = %query.query_id, age, "expired security query dropped");
            return false;
        }
        // The reporter's history grows by one pending report; it resolves
        // via report_confirmed / report_rejected once consensus is in.
        self.book.lock().on_report_sent(&query.reporting_node_id);
        info!(
            query_id = %query.query_id,
            height = query.height,
            from = %query.reporting_node_id,
            "security query acknowledged"
        );
        true
    }

    /// A peer's earlier report was confirmed by network consensus.
    pub fn report_confirmed(&self, node_id: &str) {
        self.book.lock().on_report_confirmed(node_id);
    }

    /// A peer's earlier report was rejected by network consensus.
    pub fn report_rejected(&self, node_id: &str) {
        self.book.lock().on_report_rejected(node_id);
    }

    /// Long-lived reporting score for a peer (0.5 when unknown).
    pub fn reporter_score(&self, node_id: &str) -> f32 {
        self.book.lock().score(node_id)
    }

    /// Whether a peer's reports should be believed at the default
    /// threshold.
    pub fn reporter_trusted(&self, node_id: &str) -> bool {
        self.book.lock().is_trusted(node_id, REPORT_TRUST_THRESHOLD)
    }

    /// Build this node's response to a peer's query from the local store.
    pub fn answer_query(&self, query: &SecurityQuery, store: &CheckpointStore) -> SecurityResponse {
        let matches_local = store.check(query.height, &query.expected_hash) == CheckResult::Match;
        SecurityResponse {
            query_id: query.query_id.clone(),
            node_id: self.node_id.clone(),
            height: query.height,
            matches_local,
            height_hash: store.hash_at(query.height),
            timestamp: unix_now(),
        }
    }

    /// Process a response received from a peer.
    ///
    /// Well-formed responses feed the responder's reputation: agreement is
    /// a valid outcome, disagreement a violation. Crossing the violation
    /// threshold activates the quarantine.
    pub fn handle_response(&self, response: SecurityResponse) -> bool {
        if !response.is_well_formed() {
            warn!(query_id = %response.query_id, "malformed security response dropped");
            return false;
        }

        let height = response.height;
        let node_id = response.node_id.clone();
        let matches_local = response.matches_local;

        // Late or untracked responses are excluded from consensus but the
        // responder's behaviour still counts.
        let tracked = self.queries.lock().add_response(response);
        debug!(node_id = %node_id, matches_local, tracked, "security response processed");

        let effect = self.ledger.lock().record_outcome(&node_id, matches_local);
        if effect.quarantine_threshold_reached {
            self.quarantine
                .lock()
                .activate(height, QUARANTINE_DEFAULT_SECS);
        }
        true
    }

    /// Consensus over the responses collected for `query_id`.
    pub fn consensus(&self, query_id: &str) -> Option<ConsensusResult> {
        self.queries.lock().consensus(query_id)
    }

    /// Drop expired queries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.queries.lock().cleanup_expired()
    }

    /// Number of queries awaiting responses.
    pub fn pending_count(&self) -> usize {
        self.queries.lock().pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lynx_core::constants::QUARANTINE_VIOLATION_THRESHOLD;

    fn protocol() -> SecurityProtocol {
        SecurityProtocol::new(
            "node-under-test",
            Arc::new(Mutex::new(ReputationLedger::new())),
            Arc::new(Mutex::new(QuarantineController::new())),
        )
    }

    fn h(byte: u8) -> Hash256 {
        Hash256([byte; 32])
    }

    #[test]
    fn initiate_returns_broadcastable_query() {
        let proto = protocol();
        let query = proto
            .initiate(120, h(1), h(2), "cdn", AttackType::HashMismatch)
            .unwrap();
        assert_eq!(query.height, 120);
        assert_eq!(query.reporting_node_id, "node-under-test");
        assert_eq!(proto.pending_count(), 1);
    }

    #[test]
    fn initiate_refuses_genesis_height() {
        let proto = protocol();
        assert!(proto
            .initiate(0, h(1), h(2), "cdn", AttackType::HashMismatch)
            .is_none());
    }

    #[test]
    fn initiate_refuses_while_quarantined() {
        let proto = protocol();
        proto.quarantine.lock().activate(50, 3600);
        assert!(proto
            .initiate(120, h(1), h(2), "cdn", AttackType::HashMismatch)
            .is_none());
        assert_eq!(proto.pending_count(), 0);
    }

    #[test]
    fn handle_query_acknowledges_valid() {
        let proto = protocol();
        let query = proto
            .initiate(120, h(1), h(2), "cdn", AttackType::Replay)
            .unwrap();
        assert!(proto.handle_query(&query));
    }

    #[test]
    fn handle_query_drops_malformed_and_expired() {
        let proto = protocol();
        let mut query = proto
            .initiate(120, h(1), h(2), "cdn", AttackType::Replay)
            .unwrap();

        let mut no_node = query.clone();
        no_node.reporting_node_id.clear();
        assert!(!proto.handle_query(&no_node));

        query.timestamp = 1; // far in the past
        assert!(!proto.handle_query(&query));
    }

    #[test]
    fn answer_query_reports_local_state() {
        let proto = protocol();
        let mut store = CheckpointStore::new();
        store.add(120, h(1)).unwrap();

        let query = proto
            .initiate(120, h(1), h(2), "cdn", AttackType::HashMismatch)
            .unwrap();
        let answer = proto.answer_query(&query, &store);
        assert!(answer.matches_local);
        assert_eq!(answer.height_hash, Some(h(1)));

        let elsewhere = proto
            .initiate(300, h(9), h(9), "cdn", AttackType::HashMismatch)
            .unwrap();
        let answer = proto.answer_query(&elsewhere, &store);
        assert!(!answer.matches_local);
        assert_eq!(answer.height_hash, None);
    }

    #[test]
    fn responses_feed_reputation_and_consensus() {
        let proto = protocol();
        let query = proto
            .initiate(120, h(1), h(2), "cdn", AttackType::HashMismatch)
            .unwrap();

        for (node, matches) in [("n1", true), ("n2", true), ("n3", false)] {
            let response = SecurityResponse {
                query_id: query.query_id.clone(),
                node_id: node.to_string(),
                height: 120,
                matches_local: matches,
                height_hash: None,
                timestamp: unix_now(),
            };
            assert!(proto.handle_response(response));
        }

        let result = proto.consensus(&query.query_id).unwrap();
        assert!(result.is_confirmed);

        let ledger = proto.ledger.lock();
        assert_eq!(ledger.violation_count("n1"), 0);
        assert_eq!(ledger.violation_count("n3"), 1);
    }

    #[test]
    fn malformed_response_rejected() {
        let proto = protocol();
        let response = SecurityResponse {
            query_id: "q".to_string(),
            node_id: String::new(),
            height: 120,
            matches_local: true,
            height_hash: None,
            timestamp: unix_now(),
        };
        assert!(!proto.handle_response(response));
    }

    #[test]
    fn reporter_history_accumulates_through_queries() {
        let proto = protocol();
        let peer_query = SecurityQuery {
            query_id: "peer-q".to_string(),
            height: 120,
            expected_hash: h(1),
            reported_hash: h(2),
            source: "cdn".to_string(),
            attack_type: AttackType::HashMismatch,
            reporting_node_id: "reporter".to_string(),
            timestamp: unix_now(),
            timeout_seconds: 10,
        };
        assert!(proto.handle_query(&peer_query));
        // One pending report: (0 confirmed / 1 total) * 0.9 + 0.1 = 0.1.
        assert!((proto.reporter_score("reporter") - 0.1).abs() < 1e-6);

        proto.report_confirmed("reporter");
        assert!((proto.reporter_score("reporter") - 1.0).abs() < 1e-6);
        assert!(proto.reporter_trusted("reporter"));
    }

    #[test]
    fn repeated_disagreement_triggers_quarantine() {
        let proto = protocol();
        let query = proto
            .initiate(120, h(1), h(2), "cdn", AttackType::HashMismatch)
            .unwrap();

        // One node disagreeing over and over: each response past the first
        // is a duplicate for consensus but still counts against reputation.
        for _ in 0..QUARANTINE_VIOLATION_THRESHOLD {
            let response = SecurityResponse {
                query_id: query.query_id.clone(),
                node_id: "liar".to_string(),
                height: 120,
                matches_local: false,
                height_hash: None,
                timestamp: unix_now(),
            };
            proto.handle_response(response);
        }
        assert!(proto.quarantine.lock().is_active());
    }
}
