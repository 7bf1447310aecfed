//! Long-lived P2P reputation book.
//!
//! Where the ledger tracks short-horizon violations per checkpoint source,
//! this book accumulates a node's whole reporting history: how many of its
//! security reports were later confirmed by consensus versus rejected.
//! The derived score is `(confirmed / total) * 0.9 + 0.1`, so a new node
//! starts neutral at 0.5, a perfect reporter converges to 1.0, and even a
//! fully discredited one never reaches 0.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lynx_core::constants::NEUTRAL_SCORE;
use lynx_core::error::LedgerError;
use lynx_core::time::unix_now;

/// Minimum score for a reporting node to be believed by default.
pub const REPORT_TRUST_THRESHOLD: f32 = 0.4;

/// One node's reporting history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NodeReputation {
    pub node_id: String,
    /// Derived score in [0.1, 1.0]; 0.5 until the first resolved report.
    pub score: f32,
    pub total_reports: u64,
    pub confirmed_reports: u64,
    pub false_reports: u64,
    /// Unix time of the last mutation.
    pub last_updated: u64,
    /// Unix time this record was created.
    pub created_at: u64,
    pub is_banned: bool,
    pub ban_reason: String,
}

impl NodeReputation {
    fn new(node_id: &str) -> Self {
        let now = unix_now();
        Self {
            node_id: node_id.to_string(),
            score: NEUTRAL_SCORE,
            total_reports: 0,
            confirmed_reports: 0,
            false_reports: 0,
            last_updated: now,
            created_at: now,
            is_banned: false,
            ban_reason: String::new(),
        }
    }

    /// Recompute the derived score from the counters.
    fn recompute(&mut self) {
        self.score = if self.total_reports == 0 {
            NEUTRAL_SCORE
        } else {
            (self.confirmed_reports as f32 / self.total_reports as f32) * 0.9 + 0.1
        };
        self.last_updated = unix_now();
    }

    /// Whether this node's reports should be believed.
    pub fn is_trusted(&self, threshold: f32) -> bool {
        !self.is_banned && self.score >= threshold
    }
}

/// Aggregate view over the whole book.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReputationStats {
    pub total_nodes: u64,
    pub trusted_nodes: u64,
    pub suspicious_nodes: u64,
    pub banned_nodes: u64,
    pub average_score: f32,
    pub min_score: f32,
    pub max_score: f32,
    pub total_confirmed_reports: u64,
    pub total_false_reports: u64,
}

#[derive(Serialize, Deserialize)]
struct BookFile {
    nodes: Vec<NodeReputation>,
}

/// Reporting-history reputation for every node we have heard from.
///
/// In-memory state; persistence methods do file I/O and belong outside any
/// critical section.
#[derive(Debug, Default)]
pub struct PeerReputationBook {
    nodes: HashMap<String, NodeReputation>,
}

impl PeerReputationBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// A node sent a report whose outcome is not yet known.
    pub fn on_report_sent(&mut self, node_id: &str) {
        let node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeReputation::new(node_id));
        node.total_reports += 1;
        node.recompute();
        debug!(node_id, total = node.total_reports, "reputation: report recorded");
    }

    /// A node's report was confirmed by consensus.
    pub fn on_report_confirmed(&mut self, node_id: &str) {
        let node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeReputation::new(node_id));
        node.confirmed_reports += 1;
        node.recompute();
        debug!(node_id, score = node.score, "reputation: report confirmed");
    }

    /// A node's report was rejected by consensus.
    pub fn on_report_rejected(&mut self, node_id: &str) {
        let node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeReputation::new(node_id));
        node.false_reports += 1;
        node.recompute();
        warn!(node_id, score = node.score, "reputation: report rejected");
    }

    /// Score for `node_id`; 0.5 for an unknown node.
    pub fn score(&self, node_id: &str) -> f32 {
        self.nodes
            .get(node_id)
            .map(|n| n.score)
            .unwrap_or(NEUTRAL_SCORE)
    }

    /// Whether `node_id` meets `threshold` and is not banned. Unknown
    /// nodes are neutral and pass the default threshold.
    pub fn is_trusted(&self, node_id: &str, threshold: f32) -> bool {
        match self.nodes.get(node_id) {
            Some(node) => node.is_trusted(threshold),
            None => NEUTRAL_SCORE >= threshold,
        }
    }

    /// Mark a node banned in the book.
    pub fn ban(&mut self, node_id: &str, reason: &str) {
        let node = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeReputation::new(node_id));
        node.is_banned = true;
        node.ban_reason = reason.to_string();
        node.last_updated = unix_now();
        warn!(node_id, reason, "reputation: node banned");
    }

    /// Lift a ban.
    pub fn unban(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.is_banned = false;
            node.ban_reason.clear();
            node.last_updated = unix_now();
            info!(node_id, "reputation: node unbanned");
        }
    }

    /// Full record for `node_id`, if any.
    pub fn reputation(&self, node_id: &str) -> Option<&NodeReputation> {
        self.nodes.get(node_id)
    }

    /// Number of tracked nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True iff no nodes are tracked.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Aggregate statistics over all tracked nodes.
    pub fn stats(&self) -> ReputationStats {
        let mut stats = ReputationStats {
            min_score: 1.0,
            ..ReputationStats::default()
        };
        if self.nodes.is_empty() {
            stats.min_score = 0.0;
            return stats;
        }

        let mut score_sum = 0.0f32;
        for node in self.nodes.values() {
            stats.total_nodes += 1;
            if node.is_banned {
                stats.banned_nodes += 1;
            } else if node.score >= REPORT_TRUST_THRESHOLD {
                stats.trusted_nodes += 1;
            } else {
                stats.suspicious_nodes += 1;
            }
            score_sum += node.score;
            stats.min_score = stats.min_score.min(node.score);
            stats.max_score = stats.max_score.max(node.score);
            stats.total_confirmed_reports += node.confirmed_reports;
            stats.total_false_reports += node.false_reports;
        }
        stats.average_score = score_sum / stats.total_nodes as f32;
        stats
    }

    /// Drop nodes with no activity for `inactive_secs`. Banned nodes are
    /// kept regardless. Returns the number removed.
    pub fn cleanup_inactive(&mut self, inactive_secs: u64) -> usize {
        let now = unix_now();
        let before = self.nodes.len();
        self.nodes.retain(|_, node| {
            node.is_banned || now.saturating_sub(node.last_updated) < inactive_secs
        });
        let removed = before - self.nodes.len();
        if removed > 0 {
            info!(removed, "reputation: inactive nodes dropped");
        }
        removed
    }

    /// Write the book to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let mut nodes: Vec<NodeReputation> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        let text = serde_json::to_string_pretty(&BookFile { nodes })
            .map_err(|e| LedgerError::Json(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| LedgerError::Io(e.to_string()))
    }

    /// Load the book from `path`. A missing file yields an empty book.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(e) => return Err(LedgerError::Io(e.to_string())),
        };
        let file: BookFile =
            serde_json::from_str(&text).map_err(|e| LedgerError::Json(e.to_string()))?;
        let nodes = file
            .nodes
            .into_iter()
            .map(|node| (node.node_id.clone(), node))
            .collect();
        Ok(Self { nodes })
    }
}
