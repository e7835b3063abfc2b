//! OpenSASE Reputation Updater - Main Entry Point
//!
//! One-shot list sync, meant to be run periodically by a scheduler. Each
//! run fetches at most one update per list and exits.

use anyhow::{bail, Context};
use clap::Parser;
use sase_reputation::{sync_list, ReputationConfig, UpdateClient};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sase-updater")]
#[command(author, version, about = "OpenSASE URL reputation list updater")]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "SASE_REPUTATION_CONFIG", default_value = ReputationConfig::DEFAULT_PATH)]
    config: PathBuf,

    /// List server API key, overrides `update.api_key`
    #[arg(long, env = "SASE_REPUTATION_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Only sync these lists (default: all configured)
    #[arg(long = "list", value_name = "NAME")]
    lists: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ReputationConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(key) = cli.api_key {
        config.update.api_key = key;
    }

    init_tracing(config.debug);
    info!("OpenSASE Reputation Updater v{}", env!("CARGO_PKG_VERSION"));

    if config.update.api_key.is_empty() {
        bail!("no API key: set update.api_key in {} or --api-key", cli.config.display());
    }
    for name in &cli.lists {
        if !config.lists.iter().any(|l| &l.name == name) {
            bail!("list {} is not configured", name);
        }
    }

    let client = UpdateClient::new(config.update.clone());
    let mut failed = 0;

    for list in &config.lists {
        if !cli.lists.is_empty() && !cli.lists.contains(&list.name) {
            continue;
        }
        if let Err(e) = sync_list(&client, &list.name, &list.snapshot).await {
            warn!("Update of {} failed: {}", list.name, e);
            failed += 1;
        }
    }

    if failed > 0 {
        warn!("{} list(s) not updated, previous snapshots kept", failed);
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
