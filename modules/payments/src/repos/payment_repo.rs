use chrono::{DateTime, Utc};
use event_bus::EventError;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Payment, PaymentRequest, PaymentStatus};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment {0} not found")]
    NotFound(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("invalid payment: {0}")]
    Invalid(String),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<PaymentError> for EventError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Event(inner) => inner,
            other => EventError::domain(other),
        }
    }
}

#[derive(Default)]
struct Book {
    payments: HashMap<String, Payment>,
    /// idempotency key -> transaction id
    by_key: HashMap<String, String>,
}

/// Payments indexed by transaction id and idempotency key
#[derive(Default)]
pub struct PaymentRepo {
    book: Mutex<Book>,
}

impl PaymentRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a payment in its decided status
    ///
    /// Returns `false` with the stored payment when the idempotency key was
    /// already used.
    pub async fn insert(
        &self,
        request: &PaymentRequest,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> (Payment, bool) {
        let mut book = self.book.lock().await;
        if let Some(existing) = book
            .by_key
            .get(&request.idempotency_key)
            .and_then(|id| book.payments.get(id))
        {
            return (existing.clone(), false);
        }

        let payment = Payment {
            transaction_id: Uuid::now_v7().to_string(),
            idempotency_key: request.idempotency_key.clone(),
            user_id: request.user_id,
            payment_type: request.payment_type,
            from_account_id: request.from_account_id,
            from_account_number: request.from_account_number.clone(),
            to_account_id: request.to_account_id,
            to_account_number: request.to_account_number.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            description: request.description.clone(),
            status,
            failure_reason,
            created_at: Utc::now(),
        };
        book.by_key
            .insert(payment.idempotency_key.clone(), payment.transaction_id.clone());
        book.payments
            .insert(payment.transaction_id.clone(), payment.clone());
        (payment, true)
    }

    pub async fn get(&self, transaction_id: &str) -> Option<Payment> {
        self.book.lock().await.payments.get(transaction_id).cloned()
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<Payment> {
        let book = self.book.lock().await;
        book.by_key
            .get(key)
            .and_then(|id| book.payments.get(id))
            .cloned()
    }

    pub async fn remove(&self, transaction_id: &str) -> Result<Payment, PaymentError> {
        let mut book = self.book.lock().await;
        let payment = book
            .payments
            .remove(transaction_id)
            .ok_or_else(|| PaymentError::NotFound(transaction_id.to_string()))?;
        book.by_key.remove(&payment.idempotency_key);
        Ok(payment)
    }

    pub async fn count(&self) -> usize {
        self.book.lock().await.payments.len()
    }

    /// Sum of the user's completed payments created at or after `since`
    pub async fn completed_total_since(&self, user_id: i64, since: DateTime<Utc>) -> Decimal {
        let book = self.book.lock().await;
        book.payments
            .values()
            .filter(|p| {
                p.user_id == user_id
                    && p.status == PaymentStatus::Completed
                    && p.created_at >= since
            })
            .try_fold(Decimal::ZERO, |total, p| total.checked_add(p.amount))
            .unwrap_or(Decimal::MAX)
    }

    /// Payments of any status debiting `account_id` created at or after `since`
    pub async fn count_from_account_since(&self, account_id: i64, since: DateTime<Utc>) -> usize {
        let book = self.book.lock().await;
        book.payments
            .values()
            .filter(|p| p.from_account_id == account_id && p.created_at >= since)
            .count()
    }
}
