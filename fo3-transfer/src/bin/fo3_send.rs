//! FO3 Send
//!
//! Command-line front end for a single native transfer. The seed phrase is
//! read from `FO3_MNEMONIC` so it never appears in shell history.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fo3_transfer::{TransferConfig, TransferOrchestrator, TransferRequest};

#[derive(Parser)]
#[command(name = "fo3-send")]
#[command(about = "Build, sign and broadcast a native BTC, ETH or SOL transfer")]
#[command(version)]
struct Cli {
    /// Token symbol: BTC, ETH or SOL
    #[arg(short, long)]
    symbol: String,

    /// Recipient address
    #[arg(short, long)]
    to: String,

    /// Decimal amount in the token's major unit
    #[arg(short, long)]
    amount: String,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mnemonic = std::env::var("FO3_MNEMONIC").context("FO3_MNEMONIC is not set")?;
    let config = TransferConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let orchestrator = TransferOrchestrator::new(&config).context("Failed to initialize adapters")?;

    let result = orchestrator
        .execute(TransferRequest {
            token_symbol: cli.symbol,
            recipient_address: cli.to,
            amount: cli.amount,
            mnemonic,
        })
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
