//! In-process balance store with row-level locking.
//!
//! Each provisioned wallet holds one async mutex per currency row. A mutation
//! locks only the rows it touches; the user directory is behind a short-lived
//! read lock that is released before any row lock is awaited.

use crate::account::{Balances, OperationKey, UserId};
use crate::currency::Currency;
use crate::decimal::Amount;
use crate::error::{Result, WalletError};
use crate::guard;
use crate::store::BalanceStore;
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as RowLock, MutexGuard};

/// One user's balance rows plus the idempotency keys already applied to them.
struct Wallet {
    rows: BTreeMap<Currency, RowLock<Amount>>,
    applied: Mutex<HashSet<OperationKey>>,
}

impl Wallet {
    fn provisioned() -> Self {
        Wallet {
            rows: Currency::ALL
                .into_iter()
                .map(|c| (c, RowLock::new(Amount::ZERO)))
                .collect(),
            applied: Mutex::new(HashSet::new()),
        }
    }

    fn row(&self, currency: Currency) -> Result<&RowLock<Amount>> {
        self.rows
            .get(&currency)
            .ok_or_else(|| WalletError::UnknownCurrency(currency.to_string()))
    }

    /// Runs `commit` with the key reserved, or fails if it was used before.
    ///
    /// Callers hold every row lock they are about to write, and `commit` does
    /// not suspend, so the key check and the row writes are one step.
    fn with_key<T>(
        &self,
        key: Option<&OperationKey>,
        commit: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let Some(key) = key else {
            return commit();
        };

        let mut applied = self
            .applied
            .lock()
            .map_err(|_| WalletError::StoreUnavailable("idempotency index poisoned".into()))?;
        if applied.contains(key) {
            return Err(WalletError::DuplicateOperation(key.clone()));
        }
        let out = commit()?;
        applied.insert(key.clone());
        Ok(out)
    }

    /// Runs `commit` and forgets `key` once it succeeds.
    fn release_key<T>(
        &self,
        key: Option<&OperationKey>,
        commit: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let Some(key) = key else {
            return commit();
        };

        let mut applied = self
            .applied
            .lock()
            .map_err(|_| WalletError::StoreUnavailable("idempotency index poisoned".into()))?;
        let out = commit()?;
        applied.remove(key);
        Ok(out)
    }
}

/// Balance store kept in memory.
///
/// Serializes mutations per (user, currency) row. Multi-row transactions take
/// their row locks in [`Currency`] order so opposing exchanges cannot
/// deadlock.
#[derive(Default)]
pub struct MemoryStore {
    wallets: RwLock<HashMap<UserId, Arc<Wallet>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn wallet(&self, user: &UserId) -> Result<Arc<Wallet>> {
        let wallets = self
            .wallets
            .read()
            .map_err(|_| WalletError::StoreUnavailable("wallet directory poisoned".into()))?;
        wallets
            .get(user)
            .cloned()
            .ok_or_else(|| WalletError::UnknownUser(user.clone()))
    }

    /// Returns the provisioned users in order.
    pub fn users(&self) -> Result<Vec<UserId>> {
        let wallets = self
            .wallets
            .read()
            .map_err(|_| WalletError::StoreUnavailable("wallet directory poisoned".into()))?;
        let mut users: Vec<UserId> = wallets.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

#[async_trait]
impl BalanceStore for MemoryStore {
    async fn provision(&self, user: &UserId) -> Result<Balances> {
        let mut wallets = self
            .wallets
            .write()
            .map_err(|_| WalletError::StoreUnavailable("wallet directory poisoned".into()))?;
        if wallets.contains_key(user) {
            return Err(WalletError::WalletExists(user.clone()));
        }
        wallets.insert(user.clone(), Arc::new(Wallet::provisioned()));
        debug!("Provisioned wallet for user {}", user);

        Ok(Currency::ALL.into_iter().map(|c| (c, Amount::ZERO)).collect())
    }

    async fn get_balances(&self, user: &UserId) -> Result<Balances> {
        let wallet = self.wallet(user)?;

        // Lock every row in order for a consistent cross-currency snapshot.
        let mut guards: Vec<(Currency, MutexGuard<'_, Amount>)> =
            Vec::with_capacity(wallet.rows.len());
        for (currency, row) in &wallet.rows {
            guards.push((*currency, row.lock().await));
        }

        Ok(guards.iter().map(|(c, amount)| (*c, **amount)).collect())
    }

    async fn apply_delta(
        &self,
        user: &UserId,
        currency: Currency,
        delta: Amount,
        key: Option<&OperationKey>,
    ) -> Result<Amount> {
        let wallet = self.wallet(user)?;
        let mut balance = wallet.row(currency)?.lock().await;

        let next = wallet.with_key(key, || {
            let next = guard::apply_non_negative(currency, *balance, delta)?;
            *balance = next;
            Ok(next)
        })?;

        debug!(
            "Applied {} {} to user {}, balance now {}",
            delta, currency, user, next
        );
        Ok(next)
    }

    async fn revert_delta(
        &self,
        user: &UserId,
        currency: Currency,
        delta: Amount,
        key: Option<&OperationKey>,
    ) -> Result<Amount> {
        let wallet = self.wallet(user)?;
        let mut balance = wallet.row(currency)?.lock().await;

        let next = wallet.release_key(key, || {
            let next = guard::apply_non_negative(currency, *balance, delta)?;
            *balance = next;
            Ok(next)
        })?;

        debug!(
            "Reverted {} {} for user {}, balance now {}",
            delta, currency, user, next
        );
        Ok(next)
    }

    async fn apply_deltas(
        &self,
        user: &UserId,
        deltas: &[(Currency, Amount)],
        key: Option<&OperationKey>,
    ) -> Result<Vec<Amount>> {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<(Currency, Amount)> = deltas.to_vec();
        ordered.sort_by_key(|(c, _)| *c);
        if ordered.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(WalletError::InvalidAmount(
                "a transaction may touch each currency once".into(),
            ));
        }

        let wallet = self.wallet(user)?;
        let mut guards = Vec::with_capacity(ordered.len());
        for (currency, _) in &ordered {
            guards.push(wallet.row(*currency)?.lock().await);
        }

        let applied = wallet.with_key(key, || {
            let mut next = Vec::with_capacity(ordered.len());
            for ((currency, delta), balance) in ordered.iter().zip(guards.iter()) {
                next.push(guard::apply_non_negative(*currency, **balance, *delta)?);
            }
            for (balance, amount) in guards.iter_mut().zip(next.iter()) {
                **balance = *amount;
            }
            Ok(next)
        })?;

        let by_currency: HashMap<Currency, Amount> = ordered
            .iter()
            .map(|(c, _)| *c)
            .zip(applied.iter().copied())
            .collect();
        debug!("Applied transaction {:?} to user {}", ordered, user);

        Ok(deltas.iter().map(|(c, _)| by_currency[c]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    async fn funded(user: &UserId, usd: &str, eur: &str) -> MemoryStore {
        let store = MemoryStore::new();
        store.provision(user).await.unwrap();
        store
            .apply_delta(user, Currency::Usd, dec(usd), None)
            .await
            .unwrap();
        store
            .apply_delta(user, Currency::Eur, dec(eur), None)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_provision_creates_zero_rows_for_every_currency() {
        let store = MemoryStore::new();
        let user = UserId::new("alice");

        let balances = store.provision(&user).await.unwrap();
        assert_eq!(balances.len(), Currency::ALL.len());
        assert!(balances.iter().all(|(_, a)| a.is_zero()));
        assert_eq!(store.get_balances(&user).await.unwrap(), balances);
    }

    #[tokio::test]
    async fn test_provision_twice_fails() {
        let store = MemoryStore::new();
        let user = UserId::new("alice");
        store.provision(&user).await.unwrap();

        assert_eq!(
            store.provision(&user).await,
            Err(WalletError::WalletExists(user))
        );
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = MemoryStore::new();
        let ghost = UserId::new("ghost");

        assert_eq!(
            store.get_balances(&ghost).await,
            Err(WalletError::UnknownUser(ghost.clone()))
        );
        assert_eq!(
            store
                .apply_delta(&ghost, Currency::Usd, dec("1"), None)
                .await,
            Err(WalletError::UnknownUser(ghost))
        );
    }

    #[tokio::test]
    async fn test_delta_rejects_negative_result() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;

        let err = store
            .apply_delta(&user, Currency::Usd, dec("-150"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));

        let balances = store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Usd), Some(dec("100")));
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;

        // The EUR leg would go negative, so the USD leg must not land either.
        let err = store
            .apply_deltas(
                &user,
                &[(Currency::Usd, dec("10")), (Currency::Eur, dec("-60"))],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                currency: Currency::Eur,
                ..
            }
        ));

        let balances = store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Usd), Some(dec("100")));
        assert_eq!(balances.get(Currency::Eur), Some(dec("50")));
    }

    #[tokio::test]
    async fn test_transaction_returns_amounts_in_request_order() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;

        let amounts = store
            .apply_deltas(
                &user,
                &[(Currency::Eur, dec("-50")), (Currency::Usd, dec("25"))],
                None,
            )
            .await
            .unwrap();
        assert_eq!(amounts, vec![Amount::ZERO, dec("125")]);
    }

    #[tokio::test]
    async fn test_transaction_rejects_repeated_currency() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;

        let err = store
            .apply_deltas(
                &user,
                &[(Currency::Usd, dec("-10")), (Currency::Usd, dec("-10"))],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_operation_key_applies_once() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;
        let key = OperationKey::new("tx-1");

        store
            .apply_delta(&user, Currency::Usd, dec("-10"), Some(&key))
            .await
            .unwrap();
        assert_eq!(
            store
                .apply_delta(&user, Currency::Usd, dec("-10"), Some(&key))
                .await,
            Err(WalletError::DuplicateOperation(key.clone()))
        );
        assert_eq!(
            store
                .apply_deltas(&user, &[(Currency::Eur, dec("1"))], Some(&key))
                .await,
            Err(WalletError::DuplicateOperation(key))
        );

        let balances = store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Usd), Some(dec("90")));
        assert_eq!(balances.get(Currency::Eur), Some(dec("50")));
    }

    #[tokio::test]
    async fn test_failed_mutation_does_not_consume_key() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;
        let key = OperationKey::new("tx-1");

        assert!(store
            .apply_delta(&user, Currency::Usd, dec("-500"), Some(&key))
            .await
            .is_err());
        assert_eq!(
            store
                .apply_delta(&user, Currency::Usd, dec("-50"), Some(&key))
                .await
                .unwrap(),
            dec("50")
        );
    }

    #[tokio::test]
    async fn test_revert_releases_key() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;
        let key = OperationKey::new("tx-1");

        store
            .apply_delta(&user, Currency::Usd, dec("-10"), Some(&key))
            .await
            .unwrap();
        assert_eq!(
            store
                .revert_delta(&user, Currency::Usd, dec("10"), Some(&key))
                .await
                .unwrap(),
            dec("100")
        );

        // The key is free again.
        assert_eq!(
            store
                .apply_delta(&user, Currency::Usd, dec("-10"), Some(&key))
                .await
                .unwrap(),
            dec("90")
        );
    }

    #[tokio::test]
    async fn test_failed_revert_keeps_key() {
        let user = UserId::new("alice");
        let store = funded(&user, "100", "50").await;
        let key = OperationKey::new("tx-1");

        store
            .apply_delta(&user, Currency::Usd, dec("-10"), Some(&key))
            .await
            .unwrap();
        assert!(matches!(
            store
                .revert_delta(&user, Currency::Usd, dec("-500"), Some(&key))
                .await,
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert_eq!(
            store
                .apply_delta(&user, Currency::Usd, dec("-10"), Some(&key))
                .await,
            Err(WalletError::DuplicateOperation(key))
        );
    }

    #[tokio::test]
    async fn test_users_listed_in_order() {
        let store = MemoryStore::new();
        for name in ["carol", "alice", "bob"] {
            store.provision(&UserId::new(name)).await.unwrap();
        }
        let users: Vec<String> = store
            .users()
            .unwrap()
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
    }
}
