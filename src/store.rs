//! Balance store port.
//!
//! The store exclusively owns every (user, currency) balance. All mutation goes
//! through its delta primitives, which check sufficiency and write under the
//! same lock (or inside the same transaction for a relational backend).

use crate::account::{Balances, OperationKey, UserId};
use crate::currency::Currency;
use crate::decimal::Amount;
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Durable mapping of (user, currency) to balance.
///
/// # Atomicity
///
/// - `apply_delta` is serializable with respect to every other mutation of the
///   same (user, currency) row. Two withdrawals whose combined delta would
///   drive the row negative cannot both succeed.
/// - `apply_deltas` applies all of its deltas or none of them.
/// - When a key is supplied it is recorded in the same step as the mutation;
///   a second mutation with the same key for the same user fails with
///   [`crate::WalletError::DuplicateOperation`] and changes nothing.
///
/// Implementations must not hold a store-wide lock while mutating a row.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Creates a zero balance for every supported currency.
    async fn provision(&self, user: &UserId) -> Result<Balances>;

    /// Returns the current balances of `user`.
    async fn get_balances(&self, user: &UserId) -> Result<Balances>;

    /// Adds `delta` (which may be negative) to one balance and returns the new
    /// amount.
    async fn apply_delta(
        &self,
        user: &UserId,
        currency: Currency,
        delta: Amount,
        key: Option<&OperationKey>,
    ) -> Result<Amount>;

    /// Reverses an earlier `apply_delta` made under `key`.
    ///
    /// Adds `delta` and forgets `key` in the same step, so the reversed
    /// operation can be retried under its original key.
    async fn revert_delta(
        &self,
        user: &UserId,
        currency: Currency,
        delta: Amount,
        key: Option<&OperationKey>,
    ) -> Result<Amount>;

    /// Applies several deltas to distinct currencies of one user as a single
    /// transaction. New amounts are returned in the order of `deltas`.
    async fn apply_deltas(
        &self,
        user: &UserId,
        deltas: &[(Currency, Amount)],
        key: Option<&OperationKey>,
    ) -> Result<Vec<Amount>>;
}

/// Bounds a store read. A timeout means nothing was changed.
pub(crate) async fn read_within<T, F>(limit: Duration, read: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, read).await.unwrap_or_else(|_| {
        Err(WalletError::StoreUnavailable(format!(
            "read timed out after {:?}",
            limit
        )))
    })
}

/// Bounds a store mutation. A timeout leaves the outcome indeterminate since
/// the write may have committed before the deadline fired.
pub(crate) async fn mutate_within<T, F>(limit: Duration, mutation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, mutation).await.unwrap_or_else(|_| {
        Err(WalletError::OutcomeUnknown(format!(
            "mutation timed out after {:?}",
            limit
        )))
    })
}
