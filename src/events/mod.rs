//! Domain events describing transaction and account outcomes.
//!
//! Events are immutable facts: once built, an envelope is published as-is
//! and never mutated. Delivery is at-least-once and fire-and-forget from
//! the orchestrator's perspective.

pub mod memory;
pub mod redis;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use async_trait::async_trait;

use crate::domain::Transaction;

/// Topic all transaction lifecycle events are appended to.
pub const TRANSACTION_EVENTS_TOPIC: &str = "transaction-events";

const EVENT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    #[serde(rename = "transaction.completed")]
    TransactionCompleted,
    #[serde(rename = "transaction.failed")]
    TransactionFailed,
    #[serde(rename = "user.balance.updated")]
    BalanceUpdated,
    #[serde(rename = "user.banking-details.updated")]
    BankingDetailsUpdated,
}

// This service only produces events; the envelope is serialize-only so the
// untagged payload never has to be disambiguated on the way back in.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    TransactionCompleted {
        #[serde(rename = "transactionId")]
        transaction_id: Uuid,
        #[serde(rename = "senderAccountId")]
        sender_account_id: Uuid,
        #[serde(rename = "receiverAccountId")]
        receiver_account_id: Uuid,
        amount: BigDecimal,
        description: String,
    },
    TransactionFailed {
        #[serde(rename = "transactionId")]
        transaction_id: Uuid,
        #[serde(rename = "senderAccountId")]
        sender_account_id: Uuid,
        #[serde(rename = "receiverAccountId")]
        receiver_account_id: Uuid,
        amount: BigDecimal,
        reason: String,
    },
    BalanceUpdated {
        #[serde(rename = "accountId")]
        account_id: Uuid,
        #[serde(rename = "oldBalance")]
        old_balance: BigDecimal,
        #[serde(rename = "newBalance")]
        new_balance: BigDecimal,
        reason: String,
    },
    BankingDetailsUpdated {
        #[serde(rename = "accountId")]
        account_id: Uuid,
        details: serde_json::Value,
    },
}

/// Versioned, immutable event envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub payload: EventPayload,
}

impl EventEnvelope {
    fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            version: EVENT_SCHEMA_VERSION.to_string(),
            payload,
        }
    }

    pub fn transaction_completed(tx: &Transaction) -> Self {
        Self::new(
            EventType::TransactionCompleted,
            EventPayload::TransactionCompleted {
                transaction_id: tx.id,
                sender_account_id: tx.sender_account_id,
                receiver_account_id: tx.receiver_account_id,
                amount: tx.amount.clone(),
                description: tx.description.clone(),
            },
        )
    }

    pub fn transaction_failed(tx: &Transaction, reason: &str) -> Self {
        Self::new(
            EventType::TransactionFailed,
            EventPayload::TransactionFailed {
                transaction_id: tx.id,
                sender_account_id: tx.sender_account_id,
                receiver_account_id: tx.receiver_account_id,
                amount: tx.amount.clone(),
                reason: reason.to_string(),
            },
        )
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("event publish failed: {0}")]
    Transport(String),
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// At-least-once event appender. Publish failures are logged by callers,
/// never propagated as transaction failures.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event: &EventEnvelope,
    ) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Transaction as Tx;

    fn sample_tx() -> Tx {
        Tx::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            BigDecimal::from(100),
            "rent".to_string(),
            None,
        )
    }

    #[test]
    fn completed_envelope_carries_wire_event_type() {
        let tx = sample_tx();
        let envelope = EventEnvelope::transaction_completed(&tx);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["eventType"], "transaction.completed");
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["payload"]["transactionId"], tx.id.to_string());
        assert_eq!(json["payload"]["description"], "rent");
    }

    #[test]
    fn failed_envelope_carries_reason() {
        let tx = sample_tx();
        let envelope = EventEnvelope::transaction_failed(&tx, "credit leg unconfirmed");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["eventType"], "transaction.failed");
        assert_eq!(json["payload"]["reason"], "credit leg unconfirmed");
    }

    #[test]
    fn account_event_payloads_use_wire_field_names() {
        let account_id = Uuid::new_v4();
        let balance = EventPayload::BalanceUpdated {
            account_id,
            old_balance: BigDecimal::from(100),
            new_balance: BigDecimal::from(250),
            reason: "Transfer in".to_string(),
        };
        let json = serde_json::to_value(&balance).unwrap();
        assert_eq!(json["accountId"], account_id.to_string());
        assert_eq!(json["oldBalance"], "100");
        assert_eq!(json["newBalance"], "250");

        let details = EventPayload::BankingDetailsUpdated {
            account_id,
            details: serde_json::json!({ "iban": "DE89370400440532013000" }),
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["details"]["iban"], "DE89370400440532013000");

        assert_eq!(
            serde_json::to_value(EventType::BalanceUpdated).unwrap(),
            "user.balance.updated"
        );
        assert_eq!(
            serde_json::to_value(EventType::BankingDetailsUpdated).unwrap(),
            "user.banking-details.updated"
        );
    }

    #[test]
    fn distinct_envelopes_get_distinct_ids() {
        let tx = sample_tx();
        let a = EventEnvelope::transaction_completed(&tx);
        let b = EventEnvelope::transaction_completed(&tx);
        assert_ne!(a.event_id, b.event_id);
    }
}
