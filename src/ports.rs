//! Trait seams between the orchestration core and its collaborators.
//!
//! The ledger store and the account service are external systems; the
//! orchestrator only depends on these traits so adapters can be swapped
//! (Postgres vs in-memory, HTTP vs mock) without touching the workflow.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::breaker::fallback::{AccountValidation, BalanceMutation};
use crate::domain::{Transaction, TransactionStatus};

/// Remote account as reported by the account service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub balance: BigDecimal,
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("account {0} not found")]
    NotFound(Uuid),
    #[error("account service unavailable: {0}")]
    Unavailable(String),
    #[error("account service error: {0}")]
    Upstream(String),
}

/// Typed remote-call surface of the account service. Every implementation is
/// expected to route calls through the circuit breaker.
#[async_trait]
pub trait AccountsApi: Send + Sync {
    async fn get_account(&self, id: Uuid) -> Result<Account, AccountError>;

    /// Validates the account and fetches its balance. A degraded result
    /// (breaker fallback) has `degraded: true` and an unknown balance.
    async fn validate_account(&self, id: Uuid) -> Result<AccountValidation, AccountError>;

    /// Applies a signed balance delta. A degraded result is queued and
    /// unconfirmed; only `confirmed: true` counts as applied.
    async fn update_balance(
        &self,
        id: Uuid,
        amount: BigDecimal,
        reason: &str,
    ) -> Result<BalanceMutation, AccountError>;
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("transaction {0} not found")]
    NotFound(Uuid),
    #[error("transaction {id} is not {expected}")]
    Conflict {
        id: Uuid,
        expected: TransactionStatus,
    },
    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

/// Atomic write scope over the ledger. Held only across the PENDING insert
/// and the terminal-status update; the uncommitted row is its only lock.
#[async_trait]
pub trait LedgerScope: Send {
    async fn insert_pending(&mut self, tx: &Transaction) -> LedgerResult<()>;

    /// Flips the scope's PENDING row to COMPLETED. Requires PENDING.
    async fn complete(&mut self, id: Uuid, processed_at: DateTime<Utc>) -> LedgerResult<()>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Durable store of transaction records; the authoritative history of
/// money movements.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerScope>>;

    /// Committed single-row insert, used for FAILED audit rows.
    async fn insert(&self, tx: &Transaction) -> LedgerResult<Transaction>;

    async fn get(&self, id: Uuid) -> LedgerResult<Transaction>;

    /// Transactions where the account is sender or receiver, newest first,
    /// plus the total row count for pagination.
    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<(Vec<Transaction>, i64)>;

    /// Conditionally moves a transaction from `from` to `to`, returning the
    /// updated row. `Conflict` when the row is in any other status; the
    /// conditional predicate serializes concurrent writes to the same id.
    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> LedgerResult<Transaction>;
}
