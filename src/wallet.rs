//! Wallet operations facade.
//!
//! The entry point the routing layer calls with an already-authenticated
//! user id. Deposits and withdrawals are single delta-applies; exchanges are
//! delegated to the [`ExchangeCoordinator`].

use crate::account::{Balances, OperationKey, UserId};
use crate::config::LedgerConfig;
use crate::currency::Currency;
use crate::decimal::Amount;
use crate::error::{Result, WalletError};
use crate::exchange::{ExchangeCoordinator, ExchangeReceipt};
use crate::guard;
use crate::rates::{RateProvider, RateTable};
use crate::store::{mutate_within, read_within, BalanceStore};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// A balance-mutating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Deposit {
        currency: Currency,
        amount: Amount,
    },
    Withdraw {
        currency: Currency,
        amount: Amount,
    },
    Exchange {
        from: Currency,
        to: Currency,
        amount: Amount,
    },
}

/// What a successful [`Operation`] returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Balances(Balances),
    Exchanged(ExchangeReceipt),
}

impl Outcome {
    /// The post-operation balance snapshot.
    pub fn balances(&self) -> &Balances {
        match self {
            Outcome::Balances(balances) => balances,
            Outcome::Exchanged(receipt) => &receipt.balances,
        }
    }
}

/// Deposit, withdraw, exchange and balance queries over a [`BalanceStore`].
///
/// Safe to share across tasks; every method takes `&self` and all mutation is
/// serialized by the store's row locks.
pub struct WalletService<S, R> {
    store: Arc<S>,
    config: LedgerConfig,
    exchange: ExchangeCoordinator<S, R>,
}

impl<S, R> WalletService<S, R>
where
    S: BalanceStore,
    R: RateProvider,
{
    pub fn new(store: Arc<S>, rates: Arc<R>, config: LedgerConfig) -> Self {
        let exchange = ExchangeCoordinator::new(Arc::clone(&store), rates, config.clone());
        WalletService {
            store,
            config,
            exchange,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Provisions a zero balance in every supported currency for `user`.
    pub async fn open_wallet(&self, user: &UserId) -> Result<Balances> {
        guard::user(user)?;
        let balances =
            mutate_within(self.config.store_timeout, self.store.provision(user)).await?;
        info!("Opened wallet for user {}", user);
        Ok(balances)
    }

    /// Current balances of `user`.
    pub async fn get_balance(&self, user: &UserId) -> Result<Balances> {
        guard::user(user)?;
        read_within(self.config.store_timeout, self.store.get_balances(user)).await
    }

    pub async fn deposit(
        &self,
        user: &UserId,
        currency: Currency,
        amount: Amount,
    ) -> Result<Balances> {
        let outcome = self
            .execute(user, Operation::Deposit { currency, amount }, None)
            .await?;
        Ok(outcome.balances().clone())
    }

    pub async fn withdraw(
        &self,
        user: &UserId,
        currency: Currency,
        amount: Amount,
    ) -> Result<Balances> {
        let outcome = self
            .execute(user, Operation::Withdraw { currency, amount }, None)
            .await?;
        Ok(outcome.balances().clone())
    }

    pub async fn exchange(
        &self,
        user: &UserId,
        from: Currency,
        to: Currency,
        amount: Amount,
    ) -> Result<ExchangeReceipt> {
        self.exchange.exchange(user, from, to, amount, None).await
    }

    /// The rate table as currently quoted by the provider.
    pub async fn rates(&self) -> Result<RateTable> {
        self.exchange.fetch_rates().await
    }

    /// Runs `operation` for `user`.
    ///
    /// With a `key`, the mutation is recorded under it and a replay fails with
    /// [`WalletError::DuplicateOperation`] instead of applying twice.
    pub async fn execute(
        &self,
        user: &UserId,
        operation: Operation,
        key: Option<&OperationKey>,
    ) -> Result<Outcome> {
        match operation {
            Operation::Deposit { currency, amount } => {
                guard::user(user)?;
                guard::positive_amount(amount)?;
                self.apply(user, currency, amount, key).await?;
                Ok(Outcome::Balances(self.reread(user).await?))
            }
            Operation::Withdraw { currency, amount } => {
                guard::user(user)?;
                guard::positive_amount(amount)?;

                let snapshot = self.get_balance(user).await?;
                let available = snapshot
                    .get(currency)
                    .ok_or_else(|| WalletError::UnknownCurrency(currency.to_string()))?;
                guard::covers(currency, available, amount)?;

                // The snapshot may be stale by now; the store decides.
                self.apply(user, currency, -amount, key).await?;
                Ok(Outcome::Balances(self.reread(user).await?))
            }
            Operation::Exchange { from, to, amount } => self
                .exchange
                .exchange(user, from, to, amount, key)
                .await
                .map(Outcome::Exchanged),
        }
    }

    async fn apply(
        &self,
        user: &UserId,
        currency: Currency,
        delta: Amount,
        key: Option<&OperationKey>,
    ) -> Result<Amount> {
        let balance = mutate_within(
            self.config.store_timeout,
            self.store.apply_delta(user, currency, delta, key),
        )
        .await?;
        debug!(
            "User {} {} balance moved by {} to {}",
            user, currency, delta, balance
        );
        Ok(balance)
    }

    /// Fresh snapshot after a committed mutation.
    async fn reread(&self, user: &UserId) -> Result<Balances> {
        self.get_balance(user).await.map_err(|e| {
            warn!("Mutation for user {} committed but re-read failed: {}", user, e);
            WalletError::CommittedUnread {
                converted: None,
                reason: e.to_string(),
            }
        })
    }
}
