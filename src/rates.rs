//! Exchange rate provider port.
//!
//! Rates are quoted against a single pivot currency and keyed
//! `"<BASE>_<CODE>"`, e.g. `RUB_USD = 0.012` means one RUB buys 0.012 USD.
//! Any-to-any conversion divides by the source rate and multiplies by the
//! target rate. Direct cross rates are not supported.

use crate::currency::Currency;
use crate::decimal::Amount;
use crate::error::{EngineError, EngineResult, Result, WalletError};
use async_trait::async_trait;
use csv::{ReaderBuilder, Trim};
use log::warn;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

/// Builds the lookup key for the rate of `code` against `base`.
pub fn rate_key(base: Currency, code: Currency) -> String {
    format!("{}_{}", base, code)
}

/// A quotation table as returned by the rate source.
///
/// Valid only for the single request that fetched it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateTable(BTreeMap<String, Decimal>);

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pair: impl Into<String>, rate: Decimal) {
        self.0.insert(pair.into(), rate);
    }

    pub fn get(&self, pair: &str) -> Option<Decimal> {
        self.0.get(pair).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The positive rate of `code` against `base`.
    pub fn rate(&self, base: Currency, code: Currency) -> Result<Decimal> {
        let key = rate_key(base, code);
        match self.get(&key) {
            Some(rate) if rate > Decimal::ZERO => Ok(rate),
            Some(rate) => Err(WalletError::RateUnavailable(format!(
                "rate {} is not positive: {}",
                key, rate
            ))),
            None => Err(WalletError::RateUnavailable(format!(
                "no rate quoted for {}",
                key
            ))),
        }
    }

    /// Converts `amount` of `from` into `to` via `base`.
    ///
    /// The quotient is carried at full decimal precision and rounded once,
    /// half to even, to the ledger's minimum unit.
    pub fn convert(
        &self,
        base: Currency,
        from: Currency,
        to: Currency,
        amount: Amount,
    ) -> Result<Amount> {
        let from_rate = self.rate(base, from)?;
        let to_rate = self.rate(base, to)?;

        let in_base = amount
            .as_decimal()
            .checked_div(from_rate)
            .ok_or_else(|| WalletError::InvalidAmount(format!("{} overflows conversion", amount)))?;
        let converted = in_base
            .checked_mul(to_rate)
            .ok_or_else(|| WalletError::InvalidAmount(format!("{} overflows conversion", amount)))?;

        Ok(Amount::round_half_even(converted))
    }
}

impl FromIterator<(String, Decimal)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        RateTable(iter.into_iter().collect())
    }
}

/// Source of current exchange rates.
///
/// Treated as a fallible, latency-bearing dependency outside the ledger's
/// consistency domain. Implementations report faults as
/// [`WalletError::RateUnavailable`].
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn get_rates(&self) -> Result<RateTable>;
}

/// Raw rate row as read from CSV.
#[derive(Debug, Deserialize)]
struct RateRecord {
    pair: String,
    rate: String,
}

/// A rate provider serving a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticRates {
    table: RateTable,
}

impl StaticRates {
    pub fn new(table: RateTable) -> Self {
        StaticRates { table }
    }

    /// Loads a `pair,rate` CSV.
    ///
    /// Rows with an unparseable rate are logged at warn level and skipped;
    /// a structurally broken file is an error.
    pub fn from_csv<R: Read>(reader: R) -> EngineResult<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .from_reader(reader);

        let mut table = RateTable::new();
        for (row_idx, result) in csv_reader.deserialize::<RateRecord>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row
            let record = result?;

            let pair = record.pair.trim().to_uppercase();
            if pair.is_empty() {
                return Err(EngineError::InvalidRecord {
                    row: row_num,
                    message: "empty currency pair".to_string(),
                });
            }

            match Decimal::from_str(record.rate.trim()) {
                Ok(rate) => table.insert(pair, rate),
                Err(e) => warn!("Rates row {}: invalid rate '{}': {}", row_num, record.rate, e),
            }
        }

        Ok(StaticRates { table })
    }
}

#[async_trait]
impl RateProvider for StaticRates {
    async fn get_rates(&self) -> Result<RateTable> {
        Ok(self.table.clone())
    }
}
