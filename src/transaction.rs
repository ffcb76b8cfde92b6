//! Operation records for CSV replay.

use crate::account::{OperationKey, UserId};
use crate::error::{EngineError, EngineResult, WalletError};
use crate::guard;
use crate::wallet::Operation;
use serde::Deserialize;

/// Raw operation record as read from CSV.
///
/// Columns that an operation type does not use may be empty.
#[derive(Debug, Deserialize)]
pub struct OperationRecord {
    /// Operation type: open, deposit, withdraw (or withdrawal), exchange
    #[serde(rename = "type")]
    pub op_type: String,

    /// Authenticated user id
    pub user: String,

    /// Optional idempotency key
    pub tx: Option<String>,

    /// Currency for deposit/withdraw, source currency for exchange
    pub currency: Option<String>,

    /// Target currency (exchange only)
    pub to_currency: Option<String>,

    /// Amount (absent for open)
    pub amount: Option<String>,
}

/// A parsed and validated operation ready for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOperation {
    pub user: UserId,
    pub key: Option<OperationKey>,
    pub kind: OpKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Provision the user's wallet.
    Open,

    /// Mutate balances.
    Apply(Operation),
}

impl OperationRecord {
    /// Parses the raw CSV record into a typed operation.
    ///
    /// Currency and amount checks go through the same guard the ledger uses,
    /// so a row that parses is rejected by the ledger only for state reasons
    /// (funds, provisioning, rates).
    pub fn parse(&self, row: usize) -> EngineResult<ParsedOperation> {
        let invalid = |e: WalletError| EngineError::InvalidRecord {
            row,
            message: e.to_string(),
        };

        let user = UserId::new(self.user.trim());
        guard::user(&user).map_err(invalid)?;

        let key = non_empty(&self.tx).map(OperationKey::new);

        let kind = match self.op_type.trim().to_lowercase().as_str() {
            "open" => OpKind::Open,
            "deposit" => OpKind::Apply(Operation::Deposit {
                currency: guard::currency(self.field(&self.currency, "currency", row)?)
                    .map_err(invalid)?,
                amount: guard::parse_amount(self.field(&self.amount, "amount", row)?)
                    .map_err(invalid)?,
            }),
            "withdraw" | "withdrawal" => OpKind::Apply(Operation::Withdraw {
                currency: guard::currency(self.field(&self.currency, "currency", row)?)
                    .map_err(invalid)?,
                amount: guard::parse_amount(self.field(&self.amount, "amount", row)?)
                    .map_err(invalid)?,
            }),
            "exchange" => {
                let from = guard::currency(self.field(&self.currency, "currency", row)?)
                    .map_err(invalid)?;
                let to = guard::currency(self.field(&self.to_currency, "to_currency", row)?)
                    .map_err(invalid)?;
                guard::distinct_currencies(from, to).map_err(invalid)?;
                OpKind::Apply(Operation::Exchange {
                    from,
                    to,
                    amount: guard::parse_amount(self.field(&self.amount, "amount", row)?)
                        .map_err(invalid)?,
                })
            }
            other => {
                return Err(EngineError::InvalidRecord {
                    row,
                    message: format!("unknown operation type '{}'", other),
                })
            }
        };

        Ok(ParsedOperation { user, key, kind })
    }

    fn field<'a>(
        &self,
        value: &'a Option<String>,
        name: &str,
        row: usize,
    ) -> EngineResult<&'a str> {
        non_empty(value).ok_or_else(|| EngineError::InvalidRecord {
            row,
            message: format!("missing {}", name),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
