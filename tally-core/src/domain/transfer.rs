//! Transfer domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::{Account, AccountId};
use super::entry::Entry;
use super::result::{Error, Result};

pub type TransferId = i64;

/// Immutable record of value moved from one account to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    pub fn is_self_transfer(&self) -> bool {
        self.from_account_id == self.to_account_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Transfer listing. A transfer matches when its source equals
/// `from_account_id` or its destination equals `to_account_id`; with
/// neither set every transfer matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListTransfersParams {
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
    pub limit: i64,
    pub offset: i64,
}

impl ListTransfersParams {
    /// Transfers in or out of one account
    pub fn involving(account_id: AccountId) -> Self {
        Self {
            from_account_id: Some(account_id),
            to_account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, transfer: &Transfer) -> bool {
        match (self.from_account_id, self.to_account_id) {
            (None, None) => true,
            (from, to) => {
                from == Some(transfer.from_account_id) || to == Some(transfer.to_account_id)
            }
        }
    }
}

impl Default for ListTransfersParams {
    fn default() -> Self {
        Self {
            from_account_id: None,
            to_account_id: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Input of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Reject requests no storage layer could apply meaningfully.
    ///
    /// Account existence is left to the store; a self-transfer is valid.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::validation(format!(
                "transfer amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// Output of a successful transfer. Accounts are in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(TransferRequest::new(1, 2, 10).validate().is_ok());
        assert!(TransferRequest::new(1, 1, 10).validate().is_ok());

        let err = TransferRequest::new(1, 2, 0).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(TransferRequest::new(1, 2, -5).validate().is_err());
    }

    #[test]
    fn test_list_params_match_either_side() {
        let transfer = Transfer {
            id: 1,
            from_account_id: 1,
            to_account_id: 2,
            amount: 5,
            created_at: Utc::now(),
        };
        assert!(ListTransfersParams::default().matches(&transfer));
        assert!(ListTransfersParams::involving(2).matches(&transfer));
        assert!(!ListTransfersParams::involving(3).matches(&transfer));

        let into_one = ListTransfersParams {
            to_account_id: Some(1),
            ..Default::default()
        };
        assert!(!into_one.matches(&transfer));
    }

    #[test]
    fn test_result_serializes_in_snake_case() {
        let now = Utc::now();
        let account = |id, balance| Account {
            id,
            owner: format!("owner-{}", id),
            balance,
            currency: "USD".to_string(),
            created_at: now,
        };
        let result = TransferResult {
            transfer: Transfer {
                id: 1,
                from_account_id: 1,
                to_account_id: 2,
                amount: 30,
                created_at: now,
            },
            from_account: account(1, 70),
            to_account: account(2, 80),
            from_entry: Entry {
                id: 1,
                account_id: 1,
                amount: -30,
                created_at: now,
            },
            to_entry: Entry {
                id: 2,
                account_id: 2,
                amount: 30,
                created_at: now,
            },
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["from_account"]["balance"], 70);
        assert_eq!(json["to_entry"]["amount"], 30);
        assert_eq!(json["transfer"]["from_account_id"], 1);
    }
}
