//! Money-movement orchestration.
//!
//! `create` drives a transfer from validation through the remote debit and
//! credit to a terminal ledger status; `reverse` produces a compensating
//! transaction for a completed transfer. A transaction handed back to the
//! caller is always COMPLETED or FAILED, never PENDING.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};
use crate::error::AppError;
use crate::events::{EventEnvelope, EventPublisher, TRANSACTION_EVENTS_TOPIC};
use crate::ports::{AccountError, AccountsApi, Ledger, LedgerError, LedgerScope};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

/// Outcome of one remote balance mutation leg.
#[derive(Debug, Clone)]
struct LegOutcome {
    account_id: Uuid,
    applied_amount: BigDecimal,
    confirmed: bool,
    detail: String,
}

pub struct TransferService {
    ledger: Arc<dyn Ledger>,
    accounts: Arc<dyn AccountsApi>,
    publisher: Arc<dyn EventPublisher>,
}

impl TransferService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        accounts: Arc<dyn AccountsApi>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            ledger,
            accounts,
            publisher,
        }
    }

    pub async fn create(
        &self,
        sender_account_id: Uuid,
        receiver_account_id: Uuid,
        amount: BigDecimal,
        description: String,
    ) -> Result<Transaction, AppError> {
        self.create_internal(
            sender_account_id,
            receiver_account_id,
            amount,
            description,
            None,
        )
        .await
    }

    async fn create_internal(
        &self,
        sender_account_id: Uuid,
        receiver_account_id: Uuid,
        amount: BigDecimal,
        description: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<Transaction, AppError> {
        if amount <= BigDecimal::from(0) {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        if sender_account_id == receiver_account_id {
            return Err(AppError::Validation(
                "cannot transfer to the same account".to_string(),
            ));
        }

        // Fan out both validations; money must not move on unverifiable
        // account state, so a degraded result fails the whole call.
        let (sender_validation, receiver_validation) = tokio::join!(
            self.accounts.validate_account(sender_account_id),
            self.accounts.validate_account(receiver_account_id),
        );
        let sender_validation = map_validation(sender_validation)?;
        map_validation(receiver_validation)?;

        // Best-effort funds check; the balance may be stale, so this is not
        // the sole consistency guard.
        match &sender_validation.balance {
            Some(balance) if *balance < amount => {
                return Err(AppError::InsufficientFunds(format!(
                    "balance {balance} is below amount {amount}"
                )));
            }
            Some(_) => {}
            None => {
                // Non-degraded validations always carry a balance; an
                // unknown balance never permits movement.
                return Err(AppError::ServiceUnavailable(
                    "sender balance unknown".to_string(),
                ));
            }
        }

        let tx = Transaction::pending(
            sender_account_id,
            receiver_account_id,
            amount,
            description,
            metadata,
        );

        let mut scope = self.ledger.begin().await.map_err(AppError::from)?;
        if let Err(e) = scope.insert_pending(&tx).await {
            let _ = scope.rollback().await;
            return Err(e.into());
        }

        tracing::debug!(transaction_id = %tx.id, "pending row staged, issuing balance mutations");

        let (debit, credit) = tokio::join!(
            self.mutate(
                tx.sender_account_id,
                -&tx.amount,
                format!("Transfer to {}", tx.receiver_account_id),
            ),
            self.mutate(
                tx.receiver_account_id,
                tx.amount.clone(),
                format!("Transfer from {}", tx.sender_account_id),
            ),
        );

        if debit.confirmed && credit.confirmed {
            self.finalize_completed(scope, tx).await
        } else {
            self.finalize_failed(scope, tx, debit, credit).await
        }
    }

    /// Issues one balance mutation and folds every failure mode into a leg
    /// outcome; only a confirmed response counts as applied.
    async fn mutate(&self, account_id: Uuid, amount: BigDecimal, reason: String) -> LegOutcome {
        match self
            .accounts
            .update_balance(account_id, amount.clone(), &reason)
            .await
        {
            Ok(mutation) if mutation.confirmed => LegOutcome {
                account_id,
                applied_amount: amount,
                confirmed: true,
                detail: "confirmed".to_string(),
            },
            Ok(mutation) => LegOutcome {
                account_id,
                applied_amount: amount,
                confirmed: false,
                detail: if mutation.queued {
                    "queued, unconfirmed".to_string()
                } else {
                    "unconfirmed".to_string()
                },
            },
            Err(e) => LegOutcome {
                account_id,
                applied_amount: amount,
                confirmed: false,
                detail: e.to_string(),
            },
        }
    }

    async fn finalize_completed(
        &self,
        mut scope: Box<dyn LedgerScope>,
        mut tx: Transaction,
    ) -> Result<Transaction, AppError> {
        let processed_at = Utc::now();
        let commit = async {
            scope.complete(tx.id, processed_at).await?;
            scope.commit().await
        };

        if let Err(e) = commit.await {
            // Both mutations applied but the ledger write was lost; undo the
            // remote state and record the attempt as FAILED.
            tracing::error!(transaction_id = %tx.id, error = %e, "ledger commit failed after confirmed mutations");
            let debit = LegOutcome {
                account_id: tx.sender_account_id,
                applied_amount: -&tx.amount,
                confirmed: true,
                detail: "confirmed".to_string(),
            };
            let credit = LegOutcome {
                account_id: tx.receiver_account_id,
                applied_amount: tx.amount.clone(),
                confirmed: true,
                detail: "confirmed".to_string(),
            };
            return self
                .fail_with_audit(tx, format!("ledger commit failed: {e}"), debit, credit)
                .await;
        }

        tx.status = TransactionStatus::Completed;
        tx.processed_at = processed_at;
        tracing::info!(
            transaction_id = %tx.id,
            amount = %tx.amount,
            "transaction completed"
        );

        self.publish(EventEnvelope::transaction_completed(&tx), tx.id)
            .await;
        Ok(tx)
    }

    async fn finalize_failed(
        &self,
        scope: Box<dyn LedgerScope>,
        tx: Transaction,
        debit: LegOutcome,
        credit: LegOutcome,
    ) -> Result<Transaction, AppError> {
        if let Err(e) = scope.rollback().await {
            tracing::error!(transaction_id = %tx.id, error = %e, "rollback of pending insert failed");
        }

        let reason = format!(
            "debit {}: {}; credit {}: {}",
            debit.account_id, debit.detail, credit.account_id, credit.detail
        );
        self.fail_with_audit(tx, reason, debit, credit).await
    }

    /// Compensates any confirmed leg, persists the FAILED audit row and
    /// publishes `transaction.failed`. Always returns an error.
    async fn fail_with_audit(
        &self,
        tx: Transaction,
        reason: String,
        debit: LegOutcome,
        credit: LegOutcome,
    ) -> Result<Transaction, AppError> {
        let compensations = self.compensate(&tx, [&debit, &credit]).await;
        let needs_reconciliation = compensations
            .iter()
            .any(|c| c["confirmed"] != serde_json::Value::Bool(true));

        let metadata = serde_json::json!({
            "error": reason,
            "debitConfirmed": debit.confirmed,
            "creditConfirmed": credit.confirmed,
            "compensations": compensations,
            "needsReconciliation": needs_reconciliation,
        });

        if needs_reconciliation {
            tracing::warn!(
                transaction_id = %tx.id,
                "partial remote mutation not fully compensated, flagging for reconciliation"
            );
        }

        let failed = Transaction::failed(
            tx.sender_account_id,
            tx.receiver_account_id,
            tx.amount.clone(),
            tx.description.clone(),
            metadata,
        );
        let failed = self.ledger.insert(&failed).await.map_err(AppError::from)?;

        tracing::warn!(
            attempted_transaction_id = %tx.id,
            failed_transaction_id = %failed.id,
            reason = %reason,
            "transaction failed"
        );

        self.publish(
            EventEnvelope::transaction_failed(&failed, &reason),
            failed.id,
        )
        .await;

        Err(AppError::Internal(format!("transaction failed: {reason}")))
    }

    /// One best-effort undo per confirmed leg. The account service owns the
    /// balances; all this core can do is ask for the inverse mutation and
    /// record whether it was confirmed.
    async fn compensate(
        &self,
        tx: &Transaction,
        legs: [&LegOutcome; 2],
    ) -> Vec<serde_json::Value> {
        let mut results = Vec::new();
        for leg in legs {
            if !leg.confirmed {
                continue;
            }
            let undo_amount = -&leg.applied_amount;
            let reason = format!("Compensation for failed transaction {}", tx.id);
            let confirmed = match self
                .accounts
                .update_balance(leg.account_id, undo_amount.clone(), &reason)
                .await
            {
                Ok(mutation) => mutation.confirmed,
                Err(e) => {
                    tracing::error!(
                        account_id = %leg.account_id,
                        error = %e,
                        "compensating mutation failed"
                    );
                    false
                }
            };
            results.push(serde_json::json!({
                "accountId": leg.account_id,
                "amount": undo_amount.to_string(),
                "confirmed": confirmed,
            }));
        }
        results
    }

    pub async fn reverse(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        let original = self.ledger.get(transaction_id).await.map_err(AppError::from)?;

        if original.status != TransactionStatus::Completed {
            return Err(AppError::InvalidState(format!(
                "only COMPLETED transactions can be reversed, found {}",
                original.status
            )));
        }

        // Claim the original before any money moves; the conditional flip
        // serializes concurrent reversals so only one can issue mutations.
        self.ledger
            .transition(
                original.id,
                TransactionStatus::Completed,
                TransactionStatus::Reversed,
            )
            .await
            .map_err(AppError::from)?;

        // The reversal is an independent transaction with the sides swapped;
        // if it fails, the claim is given back and nothing is retried.
        let reversal = match self
            .create_internal(
                original.receiver_account_id,
                original.sender_account_id,
                original.amount.clone(),
                format!("Reversal of transaction {}", original.id),
                Some(serde_json::json!({ "reversalOf": original.id })),
            )
            .await
        {
            Ok(reversal) => reversal,
            Err(e) => {
                if let Err(restore) = self
                    .ledger
                    .transition(
                        original.id,
                        TransactionStatus::Reversed,
                        TransactionStatus::Completed,
                    )
                    .await
                {
                    tracing::error!(
                        transaction_id = %original.id,
                        error = %restore,
                        "failed to restore COMPLETED after aborted reversal"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            original_id = %original.id,
            reversal_id = %reversal.id,
            "transaction reversed"
        );
        Ok(reversal)
    }

    pub async fn get(&self, transaction_id: Uuid) -> Result<Transaction, AppError> {
        self.ledger.get(transaction_id).await.map_err(AppError::from)
    }

    pub async fn list_for_account(
        &self,
        account_id: Uuid,
        page: i64,
        limit: i64,
    ) -> Result<Paginated<Transaction>, AppError> {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let offset = (page - 1) * limit;

        let (data, total) = self
            .ledger
            .list_for_account(account_id, limit, offset)
            .await
            .map_err(AppError::from)?;

        Ok(Paginated {
            data,
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
        })
    }

    async fn publish(&self, envelope: EventEnvelope, key: Uuid) {
        if let Err(e) = self
            .publisher
            .publish(TRANSACTION_EVENTS_TOPIC, &key.to_string(), &envelope)
            .await
        {
            // Event loss never rolls back the ledger.
            tracing::warn!(event_id = %envelope.event_id, error = %e, "event publish failed");
        }
    }
}

fn map_validation(
    result: Result<crate::breaker::fallback::AccountValidation, AccountError>,
) -> Result<crate::breaker::fallback::AccountValidation, AppError> {
    match result {
        Ok(validation) if validation.degraded => Err(AppError::ServiceUnavailable(format!(
            "validation of account {} degraded, rejecting for safety",
            validation.account_id
        ))),
        Ok(validation) if !validation.valid => Err(AppError::Validation(format!(
            "account {} is not valid",
            validation.account_id
        ))),
        Ok(validation) => Ok(validation),
        Err(AccountError::NotFound(id)) => {
            Err(AppError::Validation(format!("unknown account {id}")))
        }
        Err(e) => Err(AppError::ServiceUnavailable(e.to_string())),
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(id) => AppError::NotFound(format!("transaction {id} not found")),
            LedgerError::Conflict { id, expected } => AppError::InvalidState(format!(
                "transaction {id} is not in the {expected} state"
            )),
            LedgerError::Storage(msg) => AppError::Database(msg),
        }
    }
}
