//! ledger-node: runs a single ledger and mines on a fixed interval until
//! interrupted.

use anyhow::Context;
use clap::Parser;
use stake_ledger::events::ChannelSink;
use stake_ledger::logging::init_logging;
use stake_ledger::{Ledger, LedgerConfig, LedgerEvent, Miner, ShutdownController};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "ledger-node", about = "Proof-of-stake UTXO ledger node")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured log level
    #[arg(long, env = "LEDGER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Overrides the configured log format ("human" or "json")
    #[arg(long, env = "LEDGER_LOG_FORMAT")]
    log_format: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            LedgerConfig::from_toml_file(&path).with_context(|| format!("loading {}", path))?
        }
        None => LedgerConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    if cli.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_logging(config.log_format()?, &config.log_level).context("installing logger")?;

    let blockchain = config.blockchain().context("building genesis state")?;
    let keyring = Arc::new(config.keyring().context("loading validator keys")?);
    if keyring.is_empty() {
        tracing::warn!("no validator keys configured, mining attempts will fail");
    }

    let sink = Arc::new(ChannelSink::new(256));
    let mut events = sink.subscribe();
    let ledger = Ledger::with_sink(blockchain, sink);
    tracing::info!(
        genesis = %hex::encode(ledger.latest_block().await.hash),
        validators = keyring.len(),
        "ledger started"
    );

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LedgerEvent::NewBlock(block)) => {
                    tracing::info!(index = block.index, validator = %block.validator, "new block")
                }
                Ok(other) => tracing::debug!(event = ?other, "ledger event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = Arc::new(ShutdownController::new());
    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.wait_for_signal().await {
            tracing::error!(error = %e, "failed to listen for shutdown signals");
            signals.shutdown();
        }
    });

    let miner = Miner::new(ledger.clone(), keyring, config.settlement_delay());
    miner.run(config.mining_interval(), &shutdown).await;

    tracing::info!(height = ledger.len().await, "ledger stopped");
    Ok(())
}
