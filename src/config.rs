//! Ledger configuration.
//!
//! Settings come from environment variables so the binary can be tuned
//! without flags:
//!
//! - `WALLET_BASE_CURRENCY`: pivot currency of the rate table (default `RUB`)
//! - `WALLET_SETTLEMENT`: `atomic` or `compensating` (default `atomic`)
//! - `WALLET_RATE_TIMEOUT_MS`: bound on a rate fetch (default 2000)
//! - `WALLET_STORE_TIMEOUT_MS`: bound on a single store call (default 5000)

use crate::currency::Currency;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: unsupported currency '{value}'")]
    Currency { var: &'static str, value: String },

    #[error("{var}: expected 'atomic' or 'compensating', got '{value}'")]
    Settlement { var: &'static str, value: String },

    #[error("{var}: expected a positive number of milliseconds, got '{value}'")]
    Timeout { var: &'static str, value: String },
}

/// How an exchange applies its debit and credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettlementMode {
    /// Debit and credit in one multi-row store transaction.
    #[default]
    Atomic,

    /// Separate single-row deltas, with a compensating re-credit of the
    /// source if the credit fails.
    Compensating,
}

/// Raised when a settlement mode name is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown settlement mode '{0}'")]
pub struct UnknownSettlement(pub String);

impl FromStr for SettlementMode {
    type Err = UnknownSettlement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        match name.to_lowercase().as_str() {
            "atomic" => Ok(SettlementMode::Atomic),
            "compensating" => Ok(SettlementMode::Compensating),
            _ => Err(UnknownSettlement(name.to_string())),
        }
    }
}

/// Runtime settings for a [`crate::WalletService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Pivot currency; rates are looked up as `<BASE>_<CODE>`.
    pub base_currency: Currency,
    pub settlement: SettlementMode,
    pub rate_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_currency: Currency::Rub,
            settlement: SettlementMode::Atomic,
            rate_timeout: Duration::from_millis(2000),
            store_timeout: Duration::from_millis(5000),
        }
    }
}

impl LedgerConfig {
    pub const BASE_CURRENCY_VAR: &'static str = "WALLET_BASE_CURRENCY";
    pub const SETTLEMENT_VAR: &'static str = "WALLET_SETTLEMENT";
    pub const RATE_TIMEOUT_VAR: &'static str = "WALLET_RATE_TIMEOUT_MS";
    pub const STORE_TIMEOUT_VAR: &'static str = "WALLET_STORE_TIMEOUT_MS";

    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads settings through `lookup`, falling back to defaults for unset
    /// variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(Self::BASE_CURRENCY_VAR) {
            config.base_currency =
                Currency::from_str(&value).map_err(|_| ConfigError::Currency {
                    var: Self::BASE_CURRENCY_VAR,
                    value,
                })?;
        }

        if let Some(value) = lookup(Self::SETTLEMENT_VAR) {
            config.settlement =
                SettlementMode::from_str(&value).map_err(|e| ConfigError::Settlement {
                    var: Self::SETTLEMENT_VAR,
                    value: e.0,
                })?;
        }

        if let Some(value) = lookup(Self::RATE_TIMEOUT_VAR) {
            config.rate_timeout = parse_millis(Self::RATE_TIMEOUT_VAR, value)?;
        }

        if let Some(value) = lookup(Self::STORE_TIMEOUT_VAR) {
            config.store_timeout = parse_millis(Self::STORE_TIMEOUT_VAR, value)?;
        }

        Ok(config)
    }

    pub fn with_settlement(mut self, settlement: SettlementMode) -> Self {
        self.settlement = settlement;
        self
    }

    pub fn with_rate_timeout(mut self, timeout: Duration) -> Self {
        self.rate_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }
}

fn parse_millis(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::Timeout { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.base_currency, Currency::Rub);
        assert_eq!(config.settlement, SettlementMode::Atomic);
    }

    #[test]
    fn test_overrides() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("WALLET_BASE_CURRENCY", "usd"),
            ("WALLET_SETTLEMENT", "Compensating"),
            ("WALLET_RATE_TIMEOUT_MS", "250"),
            ("WALLET_STORE_TIMEOUT_MS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.base_currency, Currency::Usd);
        assert_eq!(config.settlement, SettlementMode::Compensating);
        assert_eq!(config.rate_timeout, Duration::from_millis(250));
        assert_eq!(config.store_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_settlement_mode_names() {
        assert_eq!(
            SettlementMode::from_str(" Atomic "),
            Ok(SettlementMode::Atomic)
        );
        assert_eq!(
            SettlementMode::from_str("eventual"),
            Err(UnknownSettlement("eventual".to_string()))
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            LedgerConfig::from_lookup(lookup(&[("WALLET_BASE_CURRENCY", "GBP")])),
            Err(ConfigError::Currency { .. })
        ));
        assert!(matches!(
            LedgerConfig::from_lookup(lookup(&[("WALLET_SETTLEMENT", " eventual ")])),
            Err(ConfigError::Settlement { ref value, .. }) if value == "eventual"
        ));
        assert!(matches!(
            LedgerConfig::from_lookup(lookup(&[("WALLET_RATE_TIMEOUT_MS", "0")])),
            Err(ConfigError::Timeout { .. })
        ));
        assert!(matches!(
            LedgerConfig::from_lookup(lookup(&[("WALLET_STORE_TIMEOUT_MS", "soon")])),
            Err(ConfigError::Timeout { .. })
        ));
    }
}
