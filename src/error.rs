//! Error types for the wallet ledger and its batch driver.

use crate::account::{OperationKey, UserId};
use crate::config::ConfigError;
use crate::currency::Currency;
use crate::decimal::Amount;
use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Result type alias for the batch driver
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Every way a ledger operation can fail.
///
/// Validation kinds (`UnknownUser`, `UnknownCurrency`, `InvalidAmount`,
/// `SameCurrency`) are raised before any store mutation. Mutation-time kinds
/// say whether anything may have been applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// No wallet is provisioned for this identity. Not retried.
    #[error("no wallet provisioned for user '{0}'")]
    UnknownUser(UserId),

    /// Currency code is outside the supported set.
    #[error("unknown currency '{0}'")]
    UnknownCurrency(String),

    /// Non-positive, malformed, or over-precise amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Exchange source and target are the same currency.
    #[error("cannot exchange {0} into itself")]
    SameCurrency(Currency),

    /// Authoritative rejection by the store. The operation did not occur.
    #[error("insufficient {currency} funds: requested {requested}, available {available}")]
    InsufficientFunds {
        currency: Currency,
        requested: Amount,
        available: Amount,
    },

    /// Rate source failed or timed out before any mutation. Safe to retry.
    #[error("exchange rate unavailable: {0}")]
    RateUnavailable(String),

    /// Debit applied but the credit did not confirm.
    #[error("conversion failed after debit: {}", compensation_note(.compensated))]
    ConversionFailed { compensated: bool },

    /// The store could not be reached. Retry with backoff.
    #[error("balance store unavailable: {0}")]
    StoreUnavailable(String),

    /// A mutation timed out; it may or may not have committed.
    #[error("operation outcome unknown: {0}")]
    OutcomeUnknown(String),

    /// The mutation committed, but the balances could not be read back.
    /// Not retried: a retry would apply the operation again. `converted` is
    /// the credited amount when the operation was an exchange.
    #[error("operation committed, balances unreadable: {reason}")]
    CommittedUnread {
        converted: Option<Amount>,
        reason: String,
    },

    /// The user already has a provisioned wallet.
    #[error("wallet already provisioned for user '{0}'")]
    WalletExists(UserId),

    /// The idempotency key was already applied for this user.
    #[error("operation '{0}' was already applied")]
    DuplicateOperation(OperationKey),
}

fn compensation_note(compensated: &bool) -> &'static str {
    if *compensated {
        "debit was reversed"
    } else {
        "manual reconciliation required"
    }
}

impl WalletError {
    /// Whether retrying the same request can succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::RateUnavailable(_) | WalletError::StoreUnavailable(_)
        )
    }

    /// Whether balances may have changed even though the call failed.
    pub fn mutation_may_have_occurred(&self) -> bool {
        matches!(
            self,
            WalletError::OutcomeUnknown(_)
                | WalletError::CommittedUnread { .. }
                | WalletError::ConversionFailed { compensated: false }
        )
    }
}

/// Errors raised while replaying an operations file.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to open or read an input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid record in an input file
    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    /// Invalid environment configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ledger error outside per-row processing
    #[error("Ledger error: {0}")]
    Wallet(#[from] WalletError),

    /// Missing input file argument
    #[error("Missing input file argument. Usage: wallet-ledger <operations.csv> [rates.csv]")]
    MissingArgument,
}
