//! Security query exchange: ask peers to confirm a suspect hash.
//!
//! When block validation hits a hash that contradicts a checkpoint, the
//! node cannot tell a local attack (its own file tampered with) from a
//! network attack (a poisoned source). A [`SecurityQuery`] asks connected
//! peers what *they* see at that height; [`calculate_consensus`] then
//! partitions the responses and decides.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lynx_core::constants::{CONSENSUS_MIN_CONFIRMATIONS, CONSENSUS_THRESHOLD, QUERY_TIMEOUT_SECS};
use lynx_core::time::unix_now;
use lynx_core::types::Hash256;

/// What kind of attack the querying node suspects.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    /// Structurally corrupt data (e.g. a malformed hash) was found locally.
    InvalidFormat,
    /// A source replayed a stale snapshot.
    Replay,
    /// A source failed seed quorum verification.
    SeedMismatch,
    /// A block hash contradicts a stored checkpoint.
    HashMismatch,
}

/// Query broadcast to peers to verify a suspect hash at a height.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SecurityQuery {
    /// Unique query id; responses reference it.
    pub query_id: String,
    /// Height under suspicion.
    pub height: u64,
    /// The hash we expected (from our checkpoint store).
    pub expected_hash: Hash256,
    /// The hash we actually received.
    pub reported_hash: Hash256,
    /// Where the suspect hash came from (URL, peer id, file path).
    pub source: String,
    pub attack_type: AttackType,
    /// Id of the node asking.
    pub reporting_node_id: String,
    /// Unix time the problem was detected.
    pub timestamp: u64,
    /// How long responses are accepted, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    QUERY_TIMEOUT_SECS
}

/// A peer's answer to a [`SecurityQuery`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SecurityResponse {
    pub query_id: String,
    /// Id of the responding node.
    pub node_id: String,
    pub height: u64,
    /// Whether the responder's local hash matches the queried expectation.
    pub matches_local: bool,
    /// The hash the responder holds at that height, if it has one.
    #[serde(default)]
    pub height_hash: Option<Hash256>,
    /// Unix time of the response.
    pub timestamp: u64,
}

impl SecurityResponse {
    /// Structural validity: a usable response names a height and a node.
    pub fn is_well_formed(&self) -> bool {
        self.height != 0 && !self.node_id.is_empty()
    }
}

/// Outcome of consensus calculation over a query's responses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsensusResult {
    /// Both the confirmation count and ratio thresholds were met.
    pub is_confirmed: bool,
    /// Nobody else sees the problem: it is local to this node.
    pub local_only: bool,
    pub confirmations: u64,
    pub denials: u64,
    /// Malformed responses, counted but never as confirmation or denial.
    pub errors: u64,
    /// Confirmations over total responses.
    pub percentage: f32,
    /// How decisive the usable responses were, in [0, 1].
    pub confidence: f32,
    pub confirming_nodes: Vec<String>,
    pub denying_nodes: Vec<String>,
}

/// Partition `responses` and decide whether the suspect problem is
/// network-confirmed.
///
/// Confirmation requires at least `min_confirmations` confirming responses
/// AND a confirming fraction of at least `threshold` over all responses.
/// Malformed responses land in the error bucket; they dilute the ratio but
/// never confirm or deny.
pub fn calculate_consensus(
    responses: &[SecurityResponse],
    threshold: f32,
    min_confirmations: u64,
) -> ConsensusResult {
    let mut result = ConsensusResult::default();
    if responses.is_empty() {
        return result;
    }

    for response in responses {
        if !response.is_well_formed() {
            result.errors += 1;
            continue;
        }
        if response.matches_local {
            result.confirmations += 1;
            result.confirming_nodes.push(response.node_id.clone());
        } else {
            result.denials += 1;
            result.denying_nodes.push(response.node_id.clone());
        }
    }

    let total = responses.len() as f32;
    result.percentage = result.confirmations as f32 / total;

    let usable = result.confirmations + result.denials;
    if usable > 0 {
        result.confidence =
            (result.confirmations.abs_diff(result.denials)) as f32 / usable as f32;
    }

    result.is_confirmed =
        result.confirmations >= min_confirmations && result.percentage >= threshold;
    result.local_only = result.confirmations == 0 && result.denials > 0;

    result
}

/// Consensus with the protocol defaults (66%, 2 confirmations).
pub fn calculate_consensus_default(responses: &[SecurityResponse]) -> ConsensusResult {
    calculate_consensus(responses, CONSENSUS_THRESHOLD, CONSENSUS_MIN_CONFIRMATIONS)
}

/// Generate a fresh query id: unix time plus random tail.
pub fn generate_query_id() -> String {
    format!("{:x}-{:08x}", unix_now(), rand::random::<u32>())
}

struct PendingQuery {
    query: SecurityQuery,
    created: Instant,
}

/// Registry of in-flight queries and their collected responses.
#[derive(Default)]
pub struct QueryManager {
    pending: HashMap<String, PendingQuery>,
    responses: HashMap<String, Vec<SecurityResponse>>,
}

impl QueryManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new query. Rejects duplicate ids.
    pub fn add_query(&mut self, query: SecurityQuery) -> bool {
        if self.pending.contains_key(&query.query_id) {
            warn!(query_id = %query.query_id, "query: duplicate id rejected");
            return false;
        }
        self.responses.insert(query.query_id.clone(), Vec::new());
        self.pending.insert(
            query.query_id.clone(),
            PendingQuery {
                query,
                created: Instant::now(),
            },
        );
        true
    }

    /// Attach a response to its query.
    ///
    /// Rejects responses for unknown queries, responses arriving after the
    /// query's `timeout_seconds`, and second responses from the same node.
    pub fn add_response(&mut self, response: SecurityResponse) -> bool {
        let Some(pending) = self.pending.get(&response.query_id) else {
            debug!(query_id = %response.query_id, "query: response for unknown query");
            return false;
        };
        if pending.created.elapsed().as_secs() > pending.query.timeout_seconds {
            debug!(
                query_id = %response.query_id,
                node_id = %response.node_id,
                "query: late response ignored"
            );
            return false;
        }
        let bucket = self.responses.entry(response.query_id.clone()).or_default();
        if bucket.iter().any(|r| r.node_id == response.node_id) {
            debug!(
                query_id = %response.query_id,
                node_id = %response.node_id,
                "query: duplicate response from node ignored"
            );
            return false;
        }
        bucket.push(response);
        true
    }

    /// Responses collected so far for `query_id`.
    pub fn responses(&self, query_id: &str) -> Vec<SecurityResponse> {
        self.responses.get(query_id).cloned().unwrap_or_default()
    }

    /// The tracked query, if still pending.
    pub fn query(&self, query_id: &str) -> Option<&SecurityQuery> {
        self.pending.get(query_id).map(|p| &p.query)
    }

    /// Run default consensus over the collected responses.
    pub fn consensus(&self, query_id: &str) -> Option<ConsensusResult> {
        self.responses
            .get(query_id)
            .map(|responses| calculate_consensus_default(responses))
    }

    /// Drop queries whose response window has closed. Collected responses
    /// are dropped with them. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.created.elapsed().as_secs() > p.query.timeout_seconds)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending.remove(id);
            self.responses.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "query: expired queries dropped");
        }
        expired.len()
    }

    /// Number of queries still pending.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    fn backdate_query(&mut self, query_id: &str, age_secs: u64) {
        if let Some(pending) = self.pending.get_mut(query_id) {
            pending.created = Instant::now() - std::time::Duration::from_secs(age_secs);
        }
    }
}
