//! Account ledger
//!
//! Balances and the set of applied transactions live behind one lock, so a
//! transaction is either applied to every touched account or to none, and
//! never applied twice.

use chrono::Utc;
use event_bus::events::BalanceOperation;
use event_bus::EventError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{Account, AccountStatus, OpenAccountRequest};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("account {0} not found")]
    NotFound(i64),

    #[error("account {0} is frozen")]
    Frozen(i64),

    #[error("insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: i64,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<AccountError> for EventError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Event(inner) => inner,
            other => EventError::domain(other),
        }
    }
}

/// One account's balance movement caused by a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub account_id: i64,
    pub account_number: String,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub amount: Decimal,
    pub operation: BalanceOperation,
}

#[derive(Default)]
struct Ledger {
    accounts: HashMap<i64, Account>,
    last_id: i64,
    applied: HashMap<String, Vec<BalanceChange>>,
}

#[derive(Default)]
pub struct AccountRepo {
    ledger: Mutex<Ledger>,
}

impl AccountRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, request: &OpenAccountRequest) -> Account {
        let mut ledger = self.ledger.lock().await;
        ledger.last_id += 1;
        let account_id = ledger.last_id;

        let account = Account {
            account_id,
            user_id: request.user_id,
            account_number: format!("ACC-{account_id:08}"),
            account_type: request.account_type.clone(),
            currency: request.currency.clone(),
            balance: request.initial_deposit,
            status: AccountStatus::Active,
            opened_at: Utc::now(),
        };
        ledger.accounts.insert(account_id, account.clone());
        account
    }

    pub async fn get(&self, account_id: i64) -> Option<Account> {
        self.ledger.lock().await.accounts.get(&account_id).cloned()
    }

    pub async fn for_user(&self, user_id: i64) -> Vec<Account> {
        let ledger = self.ledger.lock().await;
        let mut accounts: Vec<Account> = ledger
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.account_id);
        accounts
    }

    /// Debit `from` and credit `to` for a transaction, at most once
    ///
    /// A transaction id that was already applied returns the changes recorded
    /// the first time without touching balances again. Every check runs
    /// before any balance moves.
    pub async fn apply_transfer(
        &self,
        transaction_id: &str,
        from: Option<i64>,
        to: Option<i64>,
        amount: Decimal,
    ) -> Result<Vec<BalanceChange>, AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::InvalidAmount(amount));
        }

        let mut ledger = self.ledger.lock().await;
        if let Some(changes) = ledger.applied.get(transaction_id) {
            return Ok(changes.clone());
        }

        let legs: Vec<(i64, BalanceOperation)> = from
            .map(|id| (id, BalanceOperation::Debit))
            .into_iter()
            .chain(to.map(|id| (id, BalanceOperation::Credit)))
            .collect();

        // Every leg is checked against projected balances before any is applied
        let mut projected: HashMap<i64, Decimal> = HashMap::new();
        let mut changes = Vec::with_capacity(legs.len());
        for (account_id, operation) in legs {
            let account = ledger
                .accounts
                .get(&account_id)
                .ok_or(AccountError::NotFound(account_id))?;
            if !account.is_active() {
                return Err(AccountError::Frozen(account_id));
            }

            let previous_balance = projected
                .get(&account_id)
                .copied()
                .unwrap_or(account.balance);
            let new_balance = match operation {
                BalanceOperation::Debit if previous_balance < amount => {
                    return Err(AccountError::InsufficientFunds {
                        account_id,
                        balance: previous_balance,
                        requested: amount,
                    });
                }
                BalanceOperation::Debit => previous_balance.checked_sub(amount),
                BalanceOperation::Credit => previous_balance.checked_add(amount),
            }
            .ok_or(AccountError::InvalidAmount(amount))?;

            projected.insert(account_id, new_balance);
            changes.push(BalanceChange {
                account_id,
                account_number: account.account_number.clone(),
                previous_balance,
                new_balance,
                amount,
                operation,
            });
        }

        for change in &changes {
            if let Some(account) = ledger.accounts.get_mut(&change.account_id) {
                account.balance = change.new_balance;
            }
        }

        ledger
            .applied
            .insert(transaction_id.to_string(), changes.clone());
        Ok(changes)
    }

    /// Freeze every active account owned by `user_id`, returning their ids
    pub async fn freeze_user(&self, user_id: i64) -> Vec<i64> {
        let mut ledger = self.ledger.lock().await;
        let mut frozen: Vec<i64> = ledger
            .accounts
            .values_mut()
            .filter(|a| a.user_id == user_id && a.is_active())
            .map(|a| {
                a.status = AccountStatus::Frozen;
                a.account_id
            })
            .collect();
        frozen.sort_unstable();
        frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: i64, deposit: i64) -> OpenAccountRequest {
        OpenAccountRequest {
            user_id,
            account_type: "CHECKING".into(),
            currency: "EUR".into(),
            initial_deposit: Decimal::new(deposit, 0),
        }
    }

    #[tokio::test]
    async fn test_transfer_is_applied_once_per_transaction() {
        let repo = AccountRepo::new();
        let from = repo.insert(&request(7, 100)).await;
        let to = repo.insert(&request(8, 0)).await;

        let first = repo
            .apply_transfer("T1", Some(from.account_id), Some(to.account_id), Decimal::new(30, 0))
            .await
            .unwrap();
        let again = repo
            .apply_transfer("T1", Some(from.account_id), Some(to.account_id), Decimal::new(30, 0))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(repo.get(from.account_id).await.unwrap().balance, Decimal::new(70, 0));
        assert_eq!(repo.get(to.account_id).await.unwrap().balance, Decimal::new(30, 0));
        assert_eq!(first[0].operation, BalanceOperation::Debit);
        assert_eq!(first[1].operation, BalanceOperation::Credit);
    }

    #[tokio::test]
    async fn test_failed_check_moves_nothing() {
        let repo = AccountRepo::new();
        let from = repo.insert(&request(7, 10)).await;
        let to = repo.insert(&request(8, 5)).await;

        let err = repo
            .apply_transfer("T2", Some(from.account_id), Some(to.account_id), Decimal::new(50, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InsufficientFunds { .. }));
        assert_eq!(repo.get(to.account_id).await.unwrap().balance, Decimal::new(5, 0));

        // Not recorded as applied, so a later retry can still succeed
        let err = repo
            .apply_transfer("T2", None, Some(999), Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::NotFound(999)));
    }

    #[tokio::test]
    async fn test_overflowing_credit_is_rejected_without_debiting() {
        let repo = AccountRepo::new();
        let from = repo.insert(&request(7, 10)).await;
        let full = repo
            .insert(&OpenAccountRequest {
                initial_deposit: Decimal::MAX,
                ..request(8, 0)
            })
            .await;

        let err = repo
            .apply_transfer("T4", Some(from.account_id), Some(full.account_id), Decimal::ONE)
            .await
            .unwrap_err();

        assert!(matches!(err, AccountError::InvalidAmount(_)));
        assert_eq!(repo.get(from.account_id).await.unwrap().balance, Decimal::new(10, 0));
        assert_eq!(repo.get(full.account_id).await.unwrap().balance, Decimal::MAX);
    }

    #[tokio::test]
    async fn test_freeze_user_blocks_transfers() {
        let repo = AccountRepo::new();
        let a = repo.insert(&request(7, 10)).await;
        let b = repo.insert(&request(7, 10)).await;
        repo.insert(&request(8, 10)).await;

        assert_eq!(repo.freeze_user(7).await, vec![a.account_id, b.account_id]);
        assert!(repo.freeze_user(7).await.is_empty());

        let err = repo
            .apply_transfer("T3", None, Some(a.account_id), Decimal::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::Frozen(_)));
        assert!(EventError::from(err).is_retryable());
    }
}
