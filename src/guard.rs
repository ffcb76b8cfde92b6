//! Consistency checks shared by every ledger operation.
//!
//! These are pure functions with no side effects. Deposit, withdraw and
//! exchange all validate through them, so the three operations reject bad
//! input identically and always before the store is touched.

use crate::account::UserId;
use crate::currency::Currency;
use crate::decimal::Amount;
use crate::error::{Result, WalletError};
use std::str::FromStr;

/// Rejects an empty identity.
pub fn user(user: &UserId) -> Result<()> {
    if user.as_str().trim().is_empty() {
        return Err(WalletError::UnknownUser(user.clone()));
    }
    Ok(())
}

/// Resolves a textual code to a supported currency.
pub fn currency(code: &str) -> Result<Currency> {
    Currency::from_str(code).map_err(|e| WalletError::UnknownCurrency(e.0))
}

/// Parses a textual amount, rejecting malformed or over-precise input.
pub fn parse_amount(raw: &str) -> Result<Amount> {
    let amount = Amount::from_str(raw).map_err(|e| WalletError::InvalidAmount(e.to_string()))?;
    positive_amount(amount)?;
    Ok(amount)
}

/// Operation amounts must be strictly positive.
pub fn positive_amount(amount: Amount) -> Result<()> {
    if !amount.is_positive() {
        return Err(WalletError::InvalidAmount(format!(
            "{} must be greater than zero",
            amount
        )));
    }
    Ok(())
}

/// An exchange must move value between two different currencies.
pub fn distinct_currencies(from: Currency, to: Currency) -> Result<()> {
    if from == to {
        return Err(WalletError::SameCurrency(from));
    }
    Ok(())
}

/// Computes the post-delta balance, refusing to go below zero.
///
/// Stores call this while holding the row lock, so the check and the write
/// are one step.
pub fn apply_non_negative(currency: Currency, balance: Amount, delta: Amount) -> Result<Amount> {
    let next = balance
        .checked_add(delta)
        .ok_or_else(|| WalletError::InvalidAmount(format!("{} overflows the balance", delta)))?;
    if next.is_negative() {
        return Err(WalletError::InsufficientFunds {
            currency,
            requested: -delta,
            available: balance,
        });
    }
    Ok(next)
}

/// Advisory fast-fail check against a snapshot value.
///
/// The store's own rejection inside [`apply_non_negative`] remains
/// authoritative, since the balance may move between this check and the write.
pub fn covers(currency: Currency, available: Amount, requested: Amount) -> Result<()> {
    if requested > available {
        return Err(WalletError::InsufficientFunds {
            currency,
            requested,
            available,
        });
    }
    Ok(())
}
