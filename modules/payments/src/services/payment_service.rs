use chrono::{Duration, Utc};
use event_bus::events::{FraudDetected, PaymentFailed, TransactionCompleted};
use event_bus::{EventError, EventProducer, PublishMode};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::models::{Payment, PaymentRequest, PaymentStatus};
use crate::repos::{PaymentError, PaymentRepo};
use crate::services::fraud::{FraudRules, FraudVerdict};
use crate::services::validation::{screen_beneficiary, PaymentLimits, Rejection};

pub struct PaymentService {
    repo: Arc<PaymentRepo>,
    producer: EventProducer,
    limits: PaymentLimits,
    fraud: FraudRules,
}

impl PaymentService {
    pub fn new(repo: Arc<PaymentRepo>, producer: EventProducer) -> Self {
        Self {
            repo,
            producer,
            limits: PaymentLimits::default(),
            fraud: FraudRules::default(),
        }
    }

    pub fn with_limits(mut self, limits: PaymentLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_fraud_rules(mut self, fraud: FraudRules) -> Self {
        self.fraud = fraud;
        self
    }

    pub fn repo(&self) -> &Arc<PaymentRepo> {
        &self.repo
    }

    /// Validate, screen and execute a payment, publishing its outcome
    ///
    /// - limits or screening refuse it: `Failed`, `PaymentFailed`
    /// - fraud rules block it: `Rejected`, `FraudDetected` then `PaymentFailed`
    /// - otherwise `Completed`, `TransactionCompleted` (preceded by
    ///   `FraudDetected` when flagged)
    ///
    /// A repeated idempotency key returns the first payment and publishes
    /// nothing. If an event cannot be confirmed the payment is removed again
    /// so the client can retry with the same key.
    pub async fn initiate(&self, request: PaymentRequest) -> Result<Payment, PaymentError> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(request.amount));
        }
        if request.currency.trim().is_empty() {
            return Err(PaymentError::Invalid("currency is empty".to_string()));
        }
        if let Some(existing) = self
            .repo
            .find_by_idempotency_key(&request.idempotency_key)
            .await
        {
            info!(transaction_id = %existing.transaction_id, "Idempotent replay of payment");
            return Ok(existing);
        }

        let rejection = self.validate(&request).await;
        let verdict = match rejection {
            Some(_) => FraudVerdict::Allowed,
            None => {
                let recent = self
                    .repo
                    .count_from_account_since(request.from_account_id, Utc::now() - Duration::hours(1))
                    .await;
                self.fraud.evaluate(request.amount, recent)
            }
        };

        let (status, failure_reason) = match (&rejection, &verdict) {
            (Some(rejection), _) => (PaymentStatus::Failed, Some(rejection.reason.clone())),
            (None, FraudVerdict::Blocked(_)) => (
                PaymentStatus::Rejected,
                Some("blocked by fraud rules".to_string()),
            ),
            (None, _) => (PaymentStatus::Completed, None),
        };

        let (payment, created) = self.repo.insert(&request, status, failure_reason).await;
        if !created {
            return Ok(payment);
        }

        if let Err(e) = self.publish_outcome(&payment, rejection, &verdict).await {
            warn!(
                transaction_id = %payment.transaction_id,
                error = %e,
                "Payment outcome not confirmed, rolling back"
            );
            self.repo.remove(&payment.transaction_id).await?;
            return Err(e.into());
        }

        info!(
            transaction_id = %payment.transaction_id,
            user_id = payment.user_id,
            status = payment.status.as_str(),
            "Payment processed"
        );
        Ok(payment)
    }

    async fn validate(&self, request: &PaymentRequest) -> Option<Rejection> {
        let now = Utc::now();
        let spent_today = self
            .repo
            .completed_total_since(request.user_id, now - Duration::days(1))
            .await;
        let spent_this_month = self
            .repo
            .completed_total_since(request.user_id, now - Duration::days(30))
            .await;

        self.limits
            .check(spent_today, spent_this_month, request.amount)
            .or_else(|| screen_beneficiary(request.beneficiary_name.as_deref()))
    }

    async fn publish_outcome(
        &self,
        payment: &Payment,
        rejection: Option<Rejection>,
        verdict: &FraudVerdict,
    ) -> Result<(), EventError> {
        if let Some(severity) = verdict.severity() {
            let indicators = verdict.indicators().join(",");
            error!(
                transaction_id = %payment.transaction_id,
                account_id = payment.from_account_id,
                severity = severity,
                indicators = %indicators,
                "Fraud detected"
            );
            self.producer
                .emit(
                    &FraudDetected {
                        transaction_id: payment.transaction_id.clone(),
                        user_id: payment.user_id,
                        account_id: payment.from_account_id,
                        account_number: payment.from_account_number.clone(),
                        amount: payment.amount,
                        currency: payment.currency.clone(),
                        fraud_type: indicators,
                        severity: severity.to_string(),
                        description: payment.description.clone(),
                    },
                    PublishMode::Confirmed,
                )
                .await?;
        }

        let error_code = match (rejection, verdict) {
            (Some(rejection), _) => Some(rejection.code),
            (None, FraudVerdict::Blocked(_)) => Some("FRAUD_BLOCKED"),
            (None, _) => None,
        };

        match error_code {
            Some(code) => {
                warn!(
                    transaction_id = %payment.transaction_id,
                    error_code = code,
                    "Payment failed"
                );
                self.producer
                    .emit(
                        &PaymentFailed {
                            transaction_id: payment.transaction_id.clone(),
                            user_id: payment.user_id,
                            account_id: payment.from_account_id,
                            account_number: payment.from_account_number.clone(),
                            amount: payment.amount,
                            currency: payment.currency.clone(),
                            failure_reason: payment.failure_reason.clone().unwrap_or_default(),
                            error_code: Some(code.to_string()),
                        },
                        PublishMode::Confirmed,
                    )
                    .await?;
            }
            None => {
                self.producer
                    .emit(
                        &TransactionCompleted {
                            transaction_id: payment.transaction_id.clone(),
                            user_id: payment.user_id,
                            from_account_id: Some(payment.from_account_id),
                            to_account_id: payment.to_account_id,
                            from_account_number: payment.from_account_number.clone(),
                            to_account_number: payment.to_account_number.clone(),
                            amount: payment.amount,
                            currency: payment.currency.clone(),
                            transaction_type: payment.payment_type.transaction_type().to_string(),
                            status: PaymentStatus::Completed.as_str().to_string(),
                            description: payment.description.clone(),
                        },
                        PublishMode::Confirmed,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
