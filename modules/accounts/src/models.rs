use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Frozen,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i64,
    pub user_id: i64,
    pub account_number: String,
    /// CHECKING, SAVINGS, ...
    pub account_type: String,
    pub currency: String,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub opened_at: DateTime<Utc>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct OpenAccountRequest {
    pub user_id: i64,
    pub account_type: String,
    pub currency: String,
    pub initial_deposit: Decimal,
}
