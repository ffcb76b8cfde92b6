//! Per-user balance snapshot and identity types.

use crate::currency::Currency;
use crate::decimal::Amount;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Verified user identity supplied by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::new(id)
    }
}

/// Caller-supplied idempotency key for a single mutating operation.
///
/// The store records the key in the same critical section as the mutation it
/// guards, so a retried request carrying the same key is rejected instead of
/// being applied twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey(String);

impl OperationKey {
    pub fn new(key: impl Into<String>) -> Self {
        OperationKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point-in-time view of every balance a user holds.
///
/// Snapshots are read-only copies. They are never fed back into a write path;
/// callers re-read the store before acting on a balance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Balances(BTreeMap<Currency, Amount>);

impl Balances {
    /// Returns the balance held in `currency`, if the wallet has that row.
    pub fn get(&self, currency: Currency) -> Option<Amount> {
        self.0.get(&currency).copied()
    }

    /// Iterates balances in currency order.
    pub fn iter(&self) -> impl Iterator<Item = (Currency, Amount)> + '_ {
        self.0.iter().map(|(c, a)| (*c, *a))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Currency, Amount)> for Balances {
    fn from_iter<I: IntoIterator<Item = (Currency, Amount)>>(iter: I) -> Self {
        Balances(iter.into_iter().collect())
    }
}

impl fmt::Display for Balances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (currency, amount)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", currency, amount)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    #[test]
    fn test_balances_are_ordered_by_currency() {
        let balances: Balances = [
            (Currency::Rub, dec("3")),
            (Currency::Usd, dec("1")),
            (Currency::Eur, dec("2")),
        ]
        .into_iter()
        .collect();

        let order: Vec<Currency> = balances.iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec![Currency::Usd, Currency::Eur, Currency::Rub]);
        assert_eq!(balances.get(Currency::Eur), Some(dec("2")));
        assert_eq!(balances.len(), 3);
    }

    #[test]
    fn test_display() {
        let balances: Balances = [(Currency::Usd, dec("100")), (Currency::Eur, dec("50.5"))]
            .into_iter()
            .collect();
        assert_eq!(balances.to_string(), "{USD: 100.0000, EUR: 50.5000}");
    }

    #[test]
    fn test_missing_currency() {
        let balances = Balances::default();
        assert!(balances.is_empty());
        assert_eq!(balances.get(Currency::Usd), None);
    }
}
