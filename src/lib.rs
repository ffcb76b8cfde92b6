//! # Wallet Ledger
//!
//! A multi-currency wallet ledger: per-user balances in a fixed set of
//! currencies, mutated by deposits, withdrawals, and rate-priced exchanges
//! between currencies.
//!
//! ## Design Principles
//!
//! - **Fixed-point arithmetic**: 4 decimal places via `rust_decimal`; a
//!   conversion rounds once, half to even
//! - **Atomic delta-apply**: the funds check and the write share one row lock
//! - **All-or-nothing exchange**: debit and credit settle in one store
//!   transaction, or are compensated and reported
//! - **Row-scoped contention**: no ledger-wide lock; operations on different
//!   (user, currency) rows run in parallel
//! - **Typed failures**: every error says whether a mutation may have happened
//!
//! ## Example
//!
//! ```no_run
//! use std::str::FromStr;
//! use std::sync::Arc;
//! use wallet_ledger::{
//!     Amount, Currency, LedgerConfig, MemoryStore, RateTable, StaticRates, UserId,
//!     WalletService,
//! };
//!
//! # async fn demo() -> wallet_ledger::Result<()> {
//! let mut rates = RateTable::new();
//! rates.insert("RUB_USD", "0.012".parse().unwrap());
//! rates.insert("RUB_EUR", "0.011".parse().unwrap());
//!
//! let wallet = WalletService::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticRates::new(rates)),
//!     LedgerConfig::default(),
//! );
//!
//! let user = UserId::new("alice");
//! wallet.open_wallet(&user).await?;
//! wallet.deposit(&user, Currency::Usd, Amount::from_str("100").unwrap()).await?;
//! let receipt = wallet
//!     .exchange(&user, Currency::Usd, Currency::Eur, Amount::from_str("100").unwrap())
//!     .await?;
//! assert_eq!(receipt.converted.to_string(), "91.6667");
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod config;
pub mod currency;
pub mod decimal;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod guard;
pub mod memory_store;
pub mod rates;
pub mod store;
pub mod transaction;
pub mod wallet;

pub use account::{Balances, OperationKey, UserId};
pub use config::{ConfigError, LedgerConfig, SettlementMode, UnknownSettlement};
pub use currency::Currency;
pub use decimal::Amount;
pub use engine::{LedgerEngine, ReplaySummary};
pub use error::{EngineError, EngineResult, Result, WalletError};
pub use exchange::{ExchangeCoordinator, ExchangeReceipt};
pub use memory_store::MemoryStore;
pub use rates::{RateProvider, RateTable, StaticRates};
pub use store::BalanceStore;
pub use transaction::{OpKind, OperationRecord, ParsedOperation};
pub use wallet::{Operation, Outcome, WalletService};
