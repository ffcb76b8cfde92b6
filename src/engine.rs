//! Batch replay of wallet operations.
//!
//! Reads an operations CSV, applies each row to an in-memory ledger in file
//! order, and writes every user's final balances. Invalid rows and rejected
//! operations are logged and skipped, the way a request handler would answer
//! one caller with an error without affecting the next.

use crate::account::Balances;
use crate::config::LedgerConfig;
use crate::error::{EngineResult, Result};
use crate::memory_store::MemoryStore;
use crate::rates::RateProvider;
use crate::transaction::{OpKind, OperationRecord, ParsedOperation};
use crate::wallet::{Outcome, WalletService};
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use std::io::{Read, Write};
use std::sync::Arc;

/// Counts of what happened during a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
    pub malformed: usize,
}

/// Replays operation files against a [`WalletService`] backed by a
/// [`MemoryStore`].
pub struct LedgerEngine<R> {
    wallet: WalletService<MemoryStore, R>,
    summary: ReplaySummary,
}

impl<R: RateProvider> LedgerEngine<R> {
    /// Creates an engine with an empty store.
    pub fn new(rates: Arc<R>, config: LedgerConfig) -> Self {
        LedgerEngine {
            wallet: WalletService::new(Arc::new(MemoryStore::new()), rates, config),
            summary: ReplaySummary::default(),
        }
    }

    pub fn wallet(&self) -> &WalletService<MemoryStore, R> {
        &self.wallet
    }

    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }

    /// Processes operations from a CSV reader in streaming fashion.
    ///
    /// Records are read one at a time and applied in order.
    pub async fn process_csv<Rd: Read>(&mut self, reader: Rd) -> EngineResult<()> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        for (row_idx, result) in csv_reader.deserialize::<OperationRecord>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            let parsed = match result {
                Ok(record) => record.parse(row_num),
                Err(e) => {
                    warn!("Row {}: CSV parse error: {}", row_num, e);
                    self.summary.malformed += 1;
                    continue;
                }
            };

            match parsed {
                Ok(op) => match self.process_operation(&op).await {
                    Ok(balances) => {
                        debug!("Row {}: user {} now holds {}", row_num, op.user, balances);
                        self.summary.applied += 1;
                    }
                    Err(e) => {
                        warn!("Row {}: {}", row_num, e);
                        self.summary.rejected += 1;
                    }
                },
                Err(e) => {
                    warn!("{}", e);
                    self.summary.malformed += 1;
                }
            }
        }

        Ok(())
    }

    async fn process_operation(&self, op: &ParsedOperation) -> Result<Balances> {
        match &op.kind {
            OpKind::Open => self.wallet.open_wallet(&op.user).await,
            OpKind::Apply(operation) => self
                .wallet
                .execute(&op.user, operation.clone(), op.key.as_ref())
                .await
                .map(|outcome| match outcome {
                    Outcome::Balances(balances) => balances,
                    Outcome::Exchanged(receipt) => receipt.balances,
                }),
        }
    }

    /// Writes final balances to CSV.
    ///
    /// Output is sorted by user, then currency, for deterministic results.
    /// All amounts are formatted with exactly 4 decimal places.
    pub async fn write_output<W: Write>(&self, writer: W) -> EngineResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["user", "currency", "balance"])?;

        for user in self.wallet.store().users()? {
            let balances = self.wallet.get_balance(&user).await?;
            for (currency, amount) in balances.iter() {
                csv_writer.write_record([
                    user.to_string(),
                    currency.to_string(),
                    amount.to_string(),
                ])?;
            }
        }

        csv_writer.flush()?;
        Ok(())
    }
}
