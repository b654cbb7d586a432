//! Account service
//!
//! Publishes `AccountCreated` when an account opens and `BalanceUpdated` for
//! every account a completed transaction touches.

use event_bus::events::{AccountCreated, BalanceUpdated, TransactionCompleted};
use event_bus::{EventEnvelope, EventProducer, PublishMode};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{Account, OpenAccountRequest};
use crate::repos::{AccountError, AccountRepo};

pub struct AccountService {
    repo: Arc<AccountRepo>,
    producer: EventProducer,
}

impl AccountService {
    pub fn new(repo: Arc<AccountRepo>, producer: EventProducer) -> Self {
        Self { repo, producer }
    }

    pub fn repo(&self) -> &Arc<AccountRepo> {
        &self.repo
    }

    /// Store a new account and publish `AccountCreated`
    ///
    /// The publish is confirmed. If the transport is down the account stays
    /// stored and the error is returned to the caller.
    pub async fn open_account(&self, request: OpenAccountRequest) -> Result<Account, AccountError> {
        if request.initial_deposit < Decimal::ZERO {
            return Err(AccountError::InvalidAmount(request.initial_deposit));
        }

        let account = self.repo.insert(&request).await;
        let event = AccountCreated {
            account_id: account.account_id,
            user_id: account.user_id,
            account_number: account.account_number.clone(),
            account_type: account.account_type.clone(),
            currency: account.currency.clone(),
            initial_balance: account.balance,
        };
        let envelope = self.producer.emit(&event, PublishMode::Confirmed).await?;

        info!(
            account_id = account.account_id,
            user_id = account.user_id,
            event_id = %envelope.event_id,
            "Account opened"
        );
        Ok(account)
    }

    /// Apply a completed transaction and publish the resulting balances
    ///
    /// Safe to re-run: the ledger applies each transaction id once and a
    /// re-run republishes the recorded balance changes.
    pub async fn apply_transaction(
        &self,
        event: &TransactionCompleted,
        cause: &EventEnvelope,
    ) -> Result<(), AccountError> {
        if !event.status.eq_ignore_ascii_case("COMPLETED") {
            debug!(
                transaction_id = %event.transaction_id,
                status = %event.status,
                "Transaction not completed, no balance change"
            );
            return Ok(());
        }

        let changes = self
            .repo
            .apply_transfer(
                &event.transaction_id,
                event.from_account_id,
                event.to_account_id,
                event.amount,
            )
            .await?;

        for change in changes {
            let update = BalanceUpdated {
                account_id: change.account_id,
                account_number: change.account_number,
                previous_balance: change.previous_balance,
                new_balance: change.new_balance,
                amount: change.amount,
                operation: change.operation,
                reason: format!("{} {}", event.transaction_type, event.transaction_id),
            };
            self.producer
                .emit_caused_by(&update, cause, PublishMode::Confirmed)
                .await?;
        }

        info!(
            transaction_id = %event.transaction_id,
            amount = %event.amount,
            "Transaction applied to balances"
        );
        Ok(())
    }

    /// Freeze all accounts of a deleted user
    pub async fn freeze_user_accounts(&self, user_id: i64) -> Vec<i64> {
        let frozen = self.repo.freeze_user(user_id).await;
        info!(user_id = user_id, frozen = frozen.len(), "Accounts frozen for deleted user");
        frozen
    }
}
