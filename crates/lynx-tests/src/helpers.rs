//! Shared test helpers: a scripted snapshot fetcher and snapshot builders.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use lynx_core::constants::Network;
use lynx_core::error::{LynxError, TransportError};
use lynx_core::snapshot::{HashLine, RawSnapshot};
use lynx_core::types::Hash256;
use lynx_sync::{AcquisitionConfig, SnapshotFetcher};

/// CDN URL used across the integration tests.
pub const CDN: &str = "http://cdn.test/checkpoints_mainnet_updated.json";
/// Seed URLs used across the integration tests.
pub const SEEDS: [&str; 3] = [
    "http://seed-a.test/checkpoints.json",
    "http://seed-b.test/checkpoints.json",
    "http://seed-c.test/checkpoints.json",
];

/// A deterministic non-genesis hash.
pub fn pin_hash(byte: u8) -> Hash256 {
    Hash256([byte; 32])
}

/// A well-formed snapshot for `network`: its correct genesis pin plus the
/// given extra pins.
pub fn snapshot(network: Network, epoch: u64, pins: &[(u64, Hash256)]) -> RawSnapshot {
    let mut hashlines = vec![HashLine {
        height: 0,
        hash: network.genesis_hash().to_hex(),
    }];
    hashlines.extend(pins.iter().map(|(height, hash)| HashLine {
        height: *height,
        hash: hash.to_hex(),
    }));
    RawSnapshot {
        network: network.as_str().to_string(),
        checkpoint_interval: 30,
        epoch_id: epoch,
        generated_at_ts: 1_750_000_000,
        hashlines,
    }
}

/// Acquisition config wired to the test endpoints with a fast corruption
/// retry backoff.
pub fn test_config(data_dir: &Path) -> AcquisitionConfig {
    AcquisitionConfig {
        cdn_url: CDN.to_string(),
        seed_urls: SEEDS.iter().map(|s| s.to_string()).collect(),
        corruption_retry_backoff: Duration::from_millis(10),
        ..AcquisitionConfig::for_network(Network::Mainnet, data_dir.to_path_buf())
    }
}

/// Scripted fetcher: each URL maps to a queue of outcomes and the last
/// outcome repeats once the queue runs down to one entry. URLs with no
/// script answer 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, VecDeque<Result<RawSnapshot, TransportError>>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: append an outcome for `url`.
    pub fn with(self, url: &str, outcome: Result<RawSnapshot, TransportError>) -> Self {
        self.push(url, outcome);
        self
    }

    /// Append an outcome for `url`.
    pub fn push(&self, url: &str, outcome: Result<RawSnapshot, TransportError>) {
        self.responses
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }
}

#[async_trait]
impl SnapshotFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<RawSnapshot, LynxError> {
        let mut map = self.responses.lock();
        let Some(queue) = map.get_mut(url) else {
            return Err(TransportError::Status(404).into());
        };
        let outcome = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match outcome {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::Status(404).into()),
        }
    }
}
