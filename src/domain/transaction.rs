//! Transaction domain entity.
//! Framework-agnostic representation of a money movement between two accounts.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a transaction. Transitions are monotonic:
/// PENDING -> COMPLETED | FAILED, and COMPLETED -> REVERSED via an
/// independent reversal transaction. No other transitions exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Reversed => "REVERSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            "REVERSED" => Some(TransactionStatus::Reversed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Transfer,
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "TRANSFER",
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "TRANSFER" => Some(TransactionType::Transfer),
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            _ => None,
        }
    }
}

/// Ledger record of a money movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub sender_account_id: Uuid,
    pub receiver_account_id: Uuid,
    pub amount: BigDecimal,
    pub description: String,
    pub status: TransactionStatus,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl Transaction {
    /// New PENDING transfer, not yet persisted.
    pub fn pending(
        sender_account_id: Uuid,
        receiver_account_id: Uuid,
        amount: BigDecimal,
        description: String,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender_account_id,
            receiver_account_id,
            amount,
            description,
            status: TransactionStatus::Pending,
            kind: TransactionType::Transfer,
            metadata,
            created_at: now,
            processed_at: now,
        }
    }

    /// Fresh FAILED audit row for an attempt whose speculative PENDING
    /// insert was rolled back. Gets its own id.
    pub fn failed(
        sender_account_id: Uuid,
        receiver_account_id: Uuid,
        amount: BigDecimal,
        description: String,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender_account_id,
            receiver_account_id,
            amount,
            description,
            status: TransactionStatus::Failed,
            kind: TransactionType::Transfer,
            metadata: Some(metadata),
            created_at: now,
            processed_at: now,
        }
    }
}
