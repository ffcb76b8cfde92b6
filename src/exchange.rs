//! Exchange transaction coordinator.
//!
//! Converts value between two balances of the same user. The rate table is
//! fetched and the credit amount computed before any row is locked; only then
//! is the debit/credit pair settled against the store.

use crate::account::{Balances, OperationKey, UserId};
use crate::config::{LedgerConfig, SettlementMode};
use crate::currency::Currency;
use crate::decimal::Amount;
use crate::error::{Result, WalletError};
use crate::guard;
use crate::rates::{RateProvider, RateTable};
use crate::store::{mutate_within, read_within, BalanceStore};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::timeout;

/// Result of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeReceipt {
    pub from: Currency,
    pub to: Currency,
    /// Amount taken from the source balance.
    pub debited: Amount,
    /// Amount credited to the target balance.
    pub converted: Amount,
    /// Balances re-read after settlement.
    pub balances: Balances,
}

/// Runs currency conversions against a balance store.
pub struct ExchangeCoordinator<S, R> {
    store: Arc<S>,
    rates: Arc<R>,
    config: LedgerConfig,
}

impl<S, R> ExchangeCoordinator<S, R>
where
    S: BalanceStore,
    R: RateProvider,
{
    pub fn new(store: Arc<S>, rates: Arc<R>, config: LedgerConfig) -> Self {
        ExchangeCoordinator {
            store,
            rates,
            config,
        }
    }

    /// Converts `amount` of `from` into `to` for `user`.
    ///
    /// The pre-read of the source balance only fails fast; the debit itself is
    /// the authoritative funds check. On success the returned balances come
    /// from a fresh read, so they reflect any interleaved operations.
    pub async fn exchange(
        &self,
        user: &UserId,
        from: Currency,
        to: Currency,
        amount: Amount,
        key: Option<&OperationKey>,
    ) -> Result<ExchangeReceipt> {
        guard::user(user)?;
        guard::distinct_currencies(from, to)?;
        guard::positive_amount(amount)?;

        let snapshot = read_within(self.config.store_timeout, self.store.get_balances(user)).await?;
        let available = snapshot
            .get(from)
            .ok_or_else(|| WalletError::UnknownCurrency(from.to_string()))?;
        guard::covers(from, available, amount)?;

        // No lock is held here; a slow rate source cannot block other writers.
        let rates = self.fetch_rates().await?;
        let converted = rates.convert(self.config.base_currency, from, to, amount)?;
        if !converted.is_positive() {
            return Err(WalletError::InvalidAmount(format!(
                "{} {} converts to nothing in {}",
                amount, from, to
            )));
        }

        match self.config.settlement {
            SettlementMode::Atomic => {
                self.settle_atomic(user, from, to, amount, converted, key)
                    .await?
            }
            SettlementMode::Compensating => {
                self.settle_compensating(user, from, to, amount, converted, key)
                    .await?
            }
        }

        let balances = read_within(self.config.store_timeout, self.store.get_balances(user))
            .await
            .map_err(|e| {
                warn!("Exchange for user {} committed but re-read failed: {}", user, e);
                WalletError::CommittedUnread {
                    converted: Some(converted),
                    reason: e.to_string(),
                }
            })?;

        info!(
            "User {} exchanged {} {} into {} {}",
            user, amount, from, converted, to
        );

        Ok(ExchangeReceipt {
            from,
            to,
            debited: amount,
            converted,
            balances,
        })
    }

    /// Fetches a fresh rate table within the configured bound.
    pub async fn fetch_rates(&self) -> Result<RateTable> {
        match timeout(self.config.rate_timeout, self.rates.get_rates()).await {
            Ok(Ok(table)) => Ok(table),
            Ok(Err(e @ WalletError::RateUnavailable(_))) => Err(e),
            Ok(Err(other)) => Err(WalletError::RateUnavailable(other.to_string())),
            Err(_) => Err(WalletError::RateUnavailable(format!(
                "rate source timed out after {:?}",
                self.config.rate_timeout
            ))),
        }
    }

    /// Debit and credit in one store transaction.
    async fn settle_atomic(
        &self,
        user: &UserId,
        from: Currency,
        to: Currency,
        amount: Amount,
        converted: Amount,
        key: Option<&OperationKey>,
    ) -> Result<()> {
        let legs = [(from, -amount), (to, converted)];
        mutate_within(
            self.config.store_timeout,
            self.store.apply_deltas(user, &legs, key),
        )
        .await?;
        Ok(())
    }

    /// Debit, then credit, reversing the debit if the credit is refused.
    async fn settle_compensating(
        &self,
        user: &UserId,
        from: Currency,
        to: Currency,
        amount: Amount,
        converted: Amount,
        key: Option<&OperationKey>,
    ) -> Result<()> {
        let limit = self.config.store_timeout;

        // Nothing has been applied yet if the debit fails.
        mutate_within(limit, self.store.apply_delta(user, from, -amount, key)).await?;
        debug!("Debited {} {} from user {}", amount, from, user);

        let credit_err = match mutate_within(
            limit,
            self.store.apply_delta(user, to, converted, None),
        )
        .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        // A timed-out credit may have landed; reversing the debit could
        // create value, so leave the pair for reconciliation.
        if credit_err.mutation_may_have_occurred() {
            error!(
                "Credit of {} {} to user {} has unknown outcome after debit of {} {}: {}; manual reconciliation required",
                converted, to, user, amount, from, credit_err
            );
            return Err(WalletError::ConversionFailed { compensated: false });
        }

        warn!(
            "Credit of {} {} to user {} failed: {}; reversing debit",
            converted, to, user, credit_err
        );
        // The reversal frees the key so the caller may retry the exchange.
        match mutate_within(limit, self.store.revert_delta(user, from, amount, key)).await {
            Ok(_) => Err(WalletError::ConversionFailed { compensated: true }),
            Err(e) => {
                error!(
                    "Reversal of {} {} for user {} failed: {}; manual reconciliation required",
                    amount, from, user, e
                );
                Err(WalletError::ConversionFailed { compensated: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::rates::StaticRates;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Amount {
        Amount::from_str(s).unwrap()
    }

    fn rates() -> StaticRates {
        StaticRates::new(
            [
                ("RUB_USD".to_string(), Decimal::from_str("0.012").unwrap()),
                ("RUB_EUR".to_string(), Decimal::from_str("0.011").unwrap()),
                ("RUB_RUB".to_string(), Decimal::ONE),
            ]
            .into_iter()
            .collect(),
        )
    }

    async fn coordinator(
        settlement: SettlementMode,
    ) -> (ExchangeCoordinator<MemoryStore, StaticRates>, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::new("alice");
        store.provision(&user).await.unwrap();
        store
            .apply_delta(&user, Currency::Usd, dec("100"), None)
            .await
            .unwrap();
        store
            .apply_delta(&user, Currency::Eur, dec("50"), None)
            .await
            .unwrap();

        let config = LedgerConfig::default().with_settlement(settlement);
        (
            ExchangeCoordinator::new(store, Arc::new(rates()), config),
            user,
        )
    }

    #[tokio::test]
    async fn test_exchange_entire_balance() {
        for mode in [SettlementMode::Atomic, SettlementMode::Compensating] {
            let (coordinator, user) = coordinator(mode).await;

            let receipt = coordinator
                .exchange(&user, Currency::Usd, Currency::Eur, dec("100"), None)
                .await
                .unwrap();

            assert_eq!(receipt.debited, dec("100"));
            assert_eq!(receipt.converted, dec("91.6667"));
            assert_eq!(receipt.balances.get(Currency::Usd), Some(Amount::ZERO));
            assert_eq!(receipt.balances.get(Currency::Eur), Some(dec("141.6667")));
        }
    }

    #[tokio::test]
    async fn test_validation_precedes_store_access() {
        let (coordinator, user) = coordinator(SettlementMode::Atomic).await;

        assert_eq!(
            coordinator
                .exchange(&user, Currency::Usd, Currency::Usd, dec("1"), None)
                .await,
            Err(WalletError::SameCurrency(Currency::Usd))
        );
        assert!(matches!(
            coordinator
                .exchange(&user, Currency::Usd, Currency::Eur, Amount::ZERO, None)
                .await,
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            coordinator
                .exchange(
                    &UserId::new("ghost"),
                    Currency::Usd,
                    Currency::Eur,
                    dec("1"),
                    None
                )
                .await,
            Err(WalletError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balances() {
        let (coordinator, user) = coordinator(SettlementMode::Atomic).await;

        let err = coordinator
            .exchange(&user, Currency::Usd, Currency::Eur, dec("100.0001"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));

        let balances = coordinator.store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Usd), Some(dec("100")));
        assert_eq!(balances.get(Currency::Eur), Some(dec("50")));
    }

    #[tokio::test]
    async fn test_missing_rate_aborts_without_mutation() {
        let (coordinator, user) = coordinator(SettlementMode::Atomic).await;

        // USD -> EUR needs RUB_USD and RUB_EUR; drop one of them.
        let coordinator = ExchangeCoordinator::new(
            Arc::clone(&coordinator.store),
            Arc::new(StaticRates::new(
                [("RUB_USD".to_string(), Decimal::from_str("0.012").unwrap())]
                    .into_iter()
                    .collect(),
            )),
            LedgerConfig::default(),
        );

        let err = coordinator
            .exchange(&user, Currency::Usd, Currency::Eur, dec("10"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::RateUnavailable(_)));

        let balances = coordinator.store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Usd), Some(dec("100")));
    }

    #[tokio::test]
    async fn test_dust_conversion_rejected() {
        let (coordinator, user) = coordinator(SettlementMode::Atomic).await;
        coordinator
            .store
            .apply_delta(&user, Currency::Rub, dec("1"), None)
            .await
            .unwrap();

        // 0.0001 RUB is 0.0000012 USD, which rounds to zero.
        let err = coordinator
            .exchange(&user, Currency::Rub, Currency::Usd, dec("0.0001"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));

        let balances = coordinator.store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Rub), Some(dec("1")));
    }

    #[tokio::test]
    async fn test_keyed_exchange_applies_once() {
        let (coordinator, user) = coordinator(SettlementMode::Atomic).await;
        let key = OperationKey::new("swap-1");

        coordinator
            .exchange(&user, Currency::Usd, Currency::Eur, dec("10"), Some(&key))
            .await
            .unwrap();
        assert_eq!(
            coordinator
                .exchange(&user, Currency::Usd, Currency::Eur, dec("10"), Some(&key))
                .await,
            Err(WalletError::DuplicateOperation(key))
        );

        let balances = coordinator.store.get_balances(&user).await.unwrap();
        assert_eq!(balances.get(Currency::Usd), Some(dec("90")));
    }
}
