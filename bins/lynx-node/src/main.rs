//! Lynx checkpoint daemon.
//!
//! Acquires checkpoint pins through the local-file → CDN → seed-node
//! fallback pipeline, verifies them against the seed quorum, and keeps the
//! local checkpoint file fresh on a periodic cycle.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lynx_core::constants::Network;
use lynx_sync::{AcquisitionConfig, CheckpointService, CycleOutcome, HttpFetcher};
use tracing::{error, info, warn};

/// Lynx checkpoint daemon.
#[derive(Parser, Debug)]
#[command(
    name = "lynx-node",
    version,
    about = "Acquires and verifies Lynx checkpoint pins from CDN and seed nodes"
)]
struct Args {
    /// Data directory for the checkpoint file and ban list
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// Connect to the public test network instead of mainnet
    #[arg(long, conflicts_with = "stagenet")]
    testnet: bool,

    /// Connect to the staging network instead of mainnet
    #[arg(long, conflicts_with = "testnet")]
    stagenet: bool,

    /// Override the checkpoint CDN URL
    #[arg(long)]
    cdn_url: Option<String>,

    /// Seeds that must agree before a snapshot is accepted
    #[arg(long, default_value_t = lynx_core::constants::QUORUM_MIN_CONFIRMATIONS)]
    min_confirmations: usize,

    /// Seconds between periodic refresh cycles
    #[arg(long, default_value_t = lynx_sync::pipeline::DEFAULT_REFRESH_INTERVAL_SECS)]
    refresh_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    /// Convert CLI args into an AcquisitionConfig.
    fn into_config(self) -> (AcquisitionConfig, String, String) {
        let network = if self.testnet {
            Network::Testnet
        } else if self.stagenet {
            Network::Stagenet
        } else {
            Network::Mainnet
        };

        let default_data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lynx")
            .join(network.data_dir_suffix());
        let data_dir = self.data_dir.unwrap_or(default_data_dir);

        let mut config = AcquisitionConfig::for_network(network, data_dir);
        if let Some(url) = self.cdn_url {
            config.cdn_url = url;
        }
        config.quorum_min_confirmations = self.min_confirmations;
        config.refresh_interval = Duration::from_secs(self.refresh_interval);

        (config, self.log_level, self.log_format)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, log_level, log_format) = args.into_config();

    init_logging(&log_level, &log_format);

    info!("Lynx checkpoint daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("network: {}", config.network);
    info!("data_dir: {:?}", config.data_dir);
    info!("cdn_url: {}", config.cdn_url);
    info!("seeds: {:?}", config.seed_urls);
    info!("quorum_min_confirmations: {}", config.quorum_min_confirmations);

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {}", e);
        process::exit(1);
    }

    let service = Arc::new(CheckpointService::new(config, Arc::new(HttpFetcher::new())));

    // First acquisition cycle. Detected corruption blocks in here until
    // the seeds provide a valid replacement; that is deliberate.
    match service.startup().await {
        Ok(CycleOutcome::FailOpen) => {
            warn!("started WITHOUT fresh checkpoint protection");
        }
        Ok(outcome) => info!(?outcome, "initial checkpoint acquisition complete"),
        Err(e) => {
            error!("checkpoint acquisition failed with a hard error: {}", e);
            process::exit(1);
        }
    }

    {
        let store = service.store();
        let store = store.lock();
        info!(
            pins = store.len(),
            max_height = store.max_height(),
            "checkpoint store ready"
        );
    }

    info!("lynx-node running (Ctrl+C to stop)");

    let refresher = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("received Ctrl+C, shutting down...");

    refresher.abort();
    info!("lynx-node shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
