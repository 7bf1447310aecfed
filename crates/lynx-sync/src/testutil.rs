//! Shared test doubles for the acquisition pipeline.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use lynx_core::constants::Network;
use lynx_core::error::{LynxError, TransportError};
use lynx_core::snapshot::{HashLine, RawSnapshot};
use lynx_core::types::Hash256;

use crate::fetch::SnapshotFetcher;

/// Scripted fetcher: each URL maps to a queue of outcomes and the last
/// outcome repeats once the queue runs down to one entry. URLs with no
/// script answer 404.
#[derive(Default)]
pub struct StubFetcher {
    responses: Mutex<HashMap<String, VecDeque<Result<RawSnapshot, TransportError>>>>,
}

impl StubFetcher {
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
impl SnapshotFetcher for StubFetcher {
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

/// A deterministic non-genesis hash.
pub fn hash(byte: u8) -> Hash256 {
    Hash256([byte; 32])
}

/// A well-formed snapshot for `network` with its correct genesis pin plus
/// the given extra pins.
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
