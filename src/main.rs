//! Wallet Ledger CLI
//!
//! Replays a CSV of wallet operations against an in-memory ledger and prints
//! every user's final balances.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- operations.csv rates.csv > balances.csv
//! ```
//!
//! The rates file is optional; without it exchanges fail with an unavailable
//! rate and are skipped.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `WALLET_BASE_CURRENCY`, `WALLET_SETTLEMENT`, `WALLET_RATE_TIMEOUT_MS`,
//!   `WALLET_STORE_TIMEOUT_MS`: ledger settings, see [`wallet_ledger::LedgerConfig`]

use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;
use std::sync::Arc;
use wallet_ledger::{EngineError, EngineResult, LedgerConfig, LedgerEngine, StaticRates};

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> EngineResult<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(EngineError::MissingArgument);
    }

    let config = LedgerConfig::from_env()?;

    let rates = match args.get(2) {
        Some(path) => StaticRates::from_csv(BufReader::new(File::open(path)?))?,
        None => StaticRates::default(),
    };

    let file = File::open(&args[1])?;
    let reader = BufReader::new(file);

    let mut engine = LedgerEngine::new(Arc::new(rates), config);
    engine.process_csv(reader).await?;

    let stdout = io::stdout();
    let handle = stdout.lock();
    engine.write_output(handle).await?;

    Ok(())
}
