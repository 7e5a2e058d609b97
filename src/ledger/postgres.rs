//! Postgres implementation of the transaction ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as PgTransaction};
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::ports::{Ledger, LedgerError, LedgerResult, LedgerScope};

const COLUMNS: &str = "id, sender_account_id, receiver_account_id, amount, description, \
                       status, kind, metadata, created_at, processed_at";

#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PostgresScope {
    tx: PgTransaction<'static, Postgres>,
}

#[async_trait]
impl LedgerScope for PostgresScope {
    async fn insert_pending(&mut self, tx: &Transaction) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (id, sender_account_id, receiver_account_id, amount, description, \
              status, kind, metadata, created_at, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(tx.id)
        .bind(tx.sender_account_id)
        .bind(tx.receiver_account_id)
        .bind(&tx.amount)
        .bind(&tx.description)
        .bind(tx.status.as_str())
        .bind(tx.kind.as_str())
        .bind(&tx.metadata)
        .bind(tx.created_at)
        .bind(tx.processed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn complete(&mut self, id: Uuid, processed_at: DateTime<Utc>) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'COMPLETED', processed_at = $2 \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .bind(processed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Conflict {
                id,
                expected: TransactionStatus::Pending,
            });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresScope { tx }))
    }

    async fn insert(&self, tx: &Transaction) -> LedgerResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO transactions \
             (id, sender_account_id, receiver_account_id, amount, description, \
              status, kind, metadata, created_at, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        ))
        .bind(tx.id)
        .bind(tx.sender_account_id)
        .bind(tx.receiver_account_id)
        .bind(&tx.amount)
        .bind(&tx.description)
        .bind(tx.status.as_str())
        .bind(tx.kind.as_str())
        .bind(&tx.metadata)
        .bind(tx.created_at)
        .bind(tx.processed_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(LedgerError::NotFound(id))?.into_domain()
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<(Vec<Transaction>, i64)> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE sender_account_id = $1 OR receiver_account_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions \
             WHERE sender_account_id = $1 OR receiver_account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        let transactions = rows
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect::<LedgerResult<Vec<_>>>()?;
        Ok((transactions, total))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "UPDATE transactions SET status = $3, processed_at = $4 \
             WHERE id = $1 AND status = $2 \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain(),
            // Either absent or not in `from`; the conditional predicate also
            // serializes concurrent writes to the same id.
            None => match self.get(id).await {
                Ok(_) => Err(LedgerError::Conflict { id, expected: from }),
                Err(e) => Err(e),
            },
        }
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    sender_account_id: Uuid,
    receiver_account_id: Uuid,
    amount: bigdecimal::BigDecimal,
    description: String,
    status: String,
    kind: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    processed_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> LedgerResult<Transaction> {
        let status = TransactionStatus::parse(&self.status)
            .ok_or_else(|| LedgerError::Storage(format!("unknown status '{}'", self.status)))?;
        let kind = TransactionType::parse(&self.kind)
            .ok_or_else(|| LedgerError::Storage(format!("unknown type '{}'", self.kind)))?;

        Ok(Transaction {
            id: self.id,
            sender_account_id: self.sender_account_id,
            receiver_account_id: self.receiver_account_id,
            amount: self.amount,
            description: self.description,
            status,
            kind,
            metadata: self.metadata,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}
