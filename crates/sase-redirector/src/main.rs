//! OpenSASE Reputation Redirector - Main Entry Point
//!
//! URL-rewrite helper driven by the web proxy over stdin/stdout.

mod rewrite;

use anyhow::Context;
use clap::Parser;
use rewrite::Rewriter;
use sase_reputation::{ConfigError, ReputationConfig};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sase-redirector")]
#[command(author, version, about = "OpenSASE URL reputation redirector")]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "SASE_REPUTATION_CONFIG", default_value = ReputationConfig::DEFAULT_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, defaulted) = match ReputationConfig::load(&cli.config) {
        Ok(config) => (config, false),
        Err(ConfigError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            (ReputationConfig::default(), true)
        }
        Err(e) => return Err(e).with_context(|| format!("loading {}", cli.config.display())),
    };

    init_tracing(config.debug);
    info!("OpenSASE Reputation Redirector v{}", env!("CARGO_PKG_VERSION"));
    if defaulted {
        warn!("{} not found, using defaults", cli.config.display());
    }

    let mut rewriter = Rewriter::new(&config);
    let served = rewrite::serve(
        &mut rewriter,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
    .context("serving requests")?;

    info!("Input closed after {} requests", served);
    Ok(())
}

/// Diagnostics go to stderr, stdout belongs to the proxy
fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
