//! Typed payloads for every event in the banking catalog.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::DomainEvent;

// ============================================================================
// User lifecycle (topic: user-events, key: user id)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCreated {
    pub user_id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub status: String,
}

impl DomainEvent for UserCreated {
    const EVENT_TYPE: &'static str = "UserCreated";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUpdated {
    pub user_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub status: String,
}

impl DomainEvent for UserUpdated {
    const EVENT_TYPE: &'static str = "UserUpdated";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeleted {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DomainEvent for UserDeleted {
    const EVENT_TYPE: &'static str = "UserDeleted";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

/// KYC review moved a user to a new status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycUpdated {
    pub user_id: i64,
    pub previous_kyc_status: String,
    pub new_kyc_status: String,
}

impl DomainEvent for KycUpdated {
    const EVENT_TYPE: &'static str = "KycUpdated";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

// ============================================================================
// Accounts (key: account id)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub account_id: i64,
    pub user_id: i64,
    pub account_number: String,
    pub account_type: String,
    pub currency: String,
    pub initial_balance: Decimal,
}

impl DomainEvent for AccountCreated {
    const EVENT_TYPE: &'static str = "AccountCreated";

    fn partition_key(&self) -> String {
        self.account_id.to_string()
    }
}

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BalanceOperation {
    Debit,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdated {
    pub account_id: i64,
    pub account_number: String,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub amount: Decimal,
    pub operation: BalanceOperation,
    pub reason: String,
}

impl DomainEvent for BalanceUpdated {
    const EVENT_TYPE: &'static str = "BalanceUpdated";

    fn partition_key(&self) -> String {
        self.account_id.to_string()
    }
}

// ============================================================================
// Payments (key: transaction id, fraud keyed by account)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCompleted {
    pub transaction_id: String,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_account_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account_id: Option<i64>,
    #[serde(default)]
    pub from_account_number: Option<String>,
    #[serde(default)]
    pub to_account_number: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    /// TRANSFER, PAYMENT, WITHDRAWAL or DEPOSIT
    pub transaction_type: String,
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl DomainEvent for TransactionCompleted {
    const EVENT_TYPE: &'static str = "TransactionCompleted";

    fn partition_key(&self) -> String {
        self.transaction_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub transaction_id: String,
    pub user_id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub account_number: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub failure_reason: String,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl DomainEvent for PaymentFailed {
    const EVENT_TYPE: &'static str = "PaymentFailed";

    fn partition_key(&self) -> String {
        self.transaction_id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudDetected {
    pub transaction_id: String,
    pub user_id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub account_number: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub fraud_type: String,
    /// LOW, MEDIUM, HIGH or CRITICAL
    pub severity: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl DomainEvent for FraudDetected {
    const EVENT_TYPE: &'static str = "FraudDetected";

    fn partition_key(&self) -> String {
        self.account_id.to_string()
    }
}

// ============================================================================
// Crypto (key: account id)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoTradeExecuted {
    pub trade_id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub crypto_currency: String,
    pub trade_type: TradeSide,
    pub crypto_amount: Decimal,
    pub fiat_amount: Decimal,
    pub fiat_currency: String,
    pub exchange_rate: Decimal,
    pub status: String,
}

impl DomainEvent for CryptoTradeExecuted {
    const EVENT_TYPE: &'static str = "CryptoTradeExecuted";

    fn partition_key(&self) -> String {
        self.account_id.to_string()
    }
}

// ============================================================================
// Analytics and notifications (key: user id)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTriggered {
    pub alert_id: String,
    pub user_id: i64,
    /// BUDGET_EXCEEDED, LOW_BALANCE, HIGH_SPENDING, ...
    pub alert_type: String,
    /// INFO, WARNING or CRITICAL
    pub severity: String,
    pub message: String,
    pub threshold: Decimal,
    pub current_value: Decimal,
    #[serde(default)]
    pub account_number: Option<String>,
}

impl DomainEvent for AlertTriggered {
    const EVENT_TYPE: &'static str = "AlertTriggered";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSent {
    pub notification_id: String,
    pub user_id: i64,
    pub notification_type: String,
    pub channel: String,
    pub subject: String,
}

impl DomainEvent for NotificationSent {
    const EVENT_TYPE: &'static str = "NotificationSent";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationFailed {
    pub notification_id: String,
    pub user_id: i64,
    pub notification_type: String,
    pub channel: String,
    pub error: String,
}

impl DomainEvent for NotificationFailed {
    const EVENT_TYPE: &'static str = "NotificationFailed";

    fn partition_key(&self) -> String {
        self.user_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decimal_amounts_serialize_as_strings() {
        let event = TransactionCompleted {
            transaction_id: "T1".into(),
            user_id: 7,
            from_account_id: Some(42),
            to_account_id: None,
            from_account_number: None,
            to_account_number: None,
            amount: Decimal::new(12550, 2),
            currency: "EUR".into(),
            transaction_type: "PAYMENT".into(),
            status: "COMPLETED".into(),
            description: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["amount"], json!("125.50"));
        assert!(value.get("to_account_id").is_none());
        assert_eq!(event.partition_key(), "T1");
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_value(BalanceOperation::Credit).unwrap(),
            json!("CREDIT")
        );
        assert_eq!(serde_json::to_value(TradeSide::Sell).unwrap(), json!("SELL"));
    }

    #[test]
    fn test_user_deleted_reason_is_optional() {
        let event: UserDeleted = serde_json::from_value(json!({ "user_id": 9 })).unwrap();
        assert_eq!(event.reason, None);
        assert_eq!(event.partition_key(), "9");
    }
}
