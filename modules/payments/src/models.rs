use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    InternalTransfer,
    SepaTransfer,
    SctInstant,
    SwiftTransfer,
    MerchantPayment,
    MobileRecharge,
}

impl PaymentType {
    /// `transaction_type` carried by `TransactionCompleted`
    pub fn transaction_type(&self) -> &'static str {
        match self {
            PaymentType::InternalTransfer
            | PaymentType::SepaTransfer
            | PaymentType::SctInstant
            | PaymentType::SwiftTransfer => "TRANSFER",
            PaymentType::MerchantPayment | PaymentType::MobileRecharge => "PAYMENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    Completed,
    /// Business or technical failure (limits, screening)
    Failed,
    /// Denied by the fraud rules
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "CREATED",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    /// Client-chosen key; repeating it returns the first payment
    pub idempotency_key: String,
    pub user_id: i64,
    pub payment_type: PaymentType,
    pub from_account_id: i64,
    #[serde(default)]
    pub from_account_number: Option<String>,
    #[serde(default)]
    pub to_account_id: Option<i64>,
    /// Beneficiary IBAN or account number
    #[serde(default)]
    pub to_account_number: Option<String>,
    #[serde(default)]
    pub beneficiary_name: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub transaction_id: String,
    pub idempotency_key: String,
    pub user_id: i64,
    pub payment_type: PaymentType,
    pub from_account_id: i64,
    pub from_account_number: Option<String>,
    pub to_account_id: Option<i64>,
    pub to_account_number: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
