//! In-memory ledger used by tests and local development. Mirrors the
//! Postgres adapter's semantics, including the staged write scope.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};
use crate::ports::{Ledger, LedgerError, LedgerResult, LedgerScope};

#[derive(Clone, Default)]
pub struct MemoryLedger {
    rows: Arc<Mutex<Vec<Transaction>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all committed rows, newest last.
    pub fn all(&self) -> Vec<Transaction> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

struct MemoryScope {
    rows: Arc<Mutex<Vec<Transaction>>>,
    staged: Vec<Transaction>,
}

#[async_trait]
impl LedgerScope for MemoryScope {
    async fn insert_pending(&mut self, tx: &Transaction) -> LedgerResult<()> {
        self.staged.push(tx.clone());
        Ok(())
    }

    async fn complete(&mut self, id: Uuid, processed_at: DateTime<Utc>) -> LedgerResult<()> {
        let staged = self
            .staged
            .iter_mut()
            .find(|t| t.id == id && t.status == TransactionStatus::Pending);
        match staged {
            Some(tx) => {
                tx.status = TransactionStatus::Completed;
                tx.processed_at = processed_at;
                Ok(())
            }
            None => Err(LedgerError::Conflict {
                id,
                expected: TransactionStatus::Pending,
            }),
        }
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.extend(self.staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        // Staged rows are simply dropped.
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerScope>> {
        Ok(Box::new(MemoryScope {
            rows: Arc::clone(&self.rows),
            staged: Vec::new(),
        }))
    }

    async fn insert(&self, tx: &Transaction) -> LedgerResult<Transaction> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.push(tx.clone());
        Ok(tx.clone())
    }

    async fn get(&self, id: Uuid) -> LedgerResult<Transaction> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(LedgerError::NotFound(id))
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<(Vec<Transaction>, i64)> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<Transaction> = rows
            .iter()
            .filter(|t| t.sender_account_id == account_id || t.receiver_account_id == account_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> LedgerResult<Transaction> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let tx = rows
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(LedgerError::NotFound(id))?;

        if tx.status != from {
            return Err(LedgerError::Conflict { id, expected: from });
        }
        tx.status = to;
        tx.processed_at = Utc::now();
        Ok(tx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn sample() -> Transaction {
        Transaction::pending(
            Uuid::new_v4(),
            Uuid::new_v4(),
            BigDecimal::from(10),
            "x".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn committed_scope_persists_rows() {
        let ledger = MemoryLedger::new();
        let tx = sample();

        let mut scope = ledger.begin().await.unwrap();
        scope.insert_pending(&tx).await.unwrap();
        scope.complete(tx.id, Utc::now()).await.unwrap();
        scope.commit().await.unwrap();

        let stored = ledger.get(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn rolled_back_scope_discards_pending_insert() {
        let ledger = MemoryLedger::new();
        let tx = sample();

        let mut scope = ledger.begin().await.unwrap();
        scope.insert_pending(&tx).await.unwrap();
        scope.rollback().await.unwrap();

        assert!(matches!(
            ledger.get(tx.id).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn complete_requires_a_pending_row_in_scope() {
        let ledger = MemoryLedger::new();
        let mut scope = ledger.begin().await.unwrap();
        let result = scope.complete(Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(result, Err(LedgerError::Conflict { .. })));
    }

    #[tokio::test]
    async fn transition_requires_the_expected_status() {
        let ledger = MemoryLedger::new();
        let mut tx = sample();
        tx.status = TransactionStatus::Failed;
        ledger.insert(&tx).await.unwrap();

        let result = ledger
            .transition(tx.id, TransactionStatus::Completed, TransactionStatus::Reversed)
            .await;
        assert!(matches!(result, Err(LedgerError::Conflict { .. })));

        let mut completed = sample();
        completed.status = TransactionStatus::Completed;
        ledger.insert(&completed).await.unwrap();
        let reversed = ledger
            .transition(
                completed.id,
                TransactionStatus::Completed,
                TransactionStatus::Reversed,
            )
            .await
            .unwrap();
        assert_eq!(reversed.status, TransactionStatus::Reversed);

        // A second claim of the same row conflicts; only one wins.
        assert!(matches!(
            ledger
                .transition(
                    completed.id,
                    TransactionStatus::Completed,
                    TransactionStatus::Reversed,
                )
                .await,
            Err(LedgerError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn listing_pages_newest_first_for_either_side() {
        let ledger = MemoryLedger::new();
        let account = Uuid::new_v4();

        let mut sent = sample();
        sent.sender_account_id = account;
        let mut received = sample();
        received.receiver_account_id = account;
        received.created_at = sent.created_at + chrono::Duration::seconds(1);

        ledger.insert(&sent).await.unwrap();
        ledger.insert(&received).await.unwrap();
        ledger.insert(&sample()).await.unwrap();

        let (page, total) = ledger.list_for_account(account, 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, received.id);
        assert_eq!(page[1].id, sent.id);

        let (second_page, _) = ledger.list_for_account(account, 1, 1).await.unwrap();
        assert_eq!(second_page[0].id, sent.id);
    }
}
