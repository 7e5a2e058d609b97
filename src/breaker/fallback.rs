//! Dependency-specific degraded responses, invoked only when the breaker
//! rejects a call.
//!
//! The two policies are deliberately distinct types: the read-path fallback
//! may let validation continue in a degraded mode, while the write-path
//! fallback is never allowed to confirm a mutation. The orchestrator fails
//! closed on both when money is about to move.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Result of validating an account, possibly degraded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountValidation {
    pub account_id: Uuid,
    pub valid: bool,
    /// `None` means the balance could not be determined. Unknown balance is
    /// treated as insufficient for any amount.
    pub balance: Option<BigDecimal>,
    /// True when this result came from a fallback instead of the service.
    pub degraded: bool,
}

/// Result of a balance mutation, possibly degraded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceMutation {
    pub account_id: Uuid,
    pub confirmed: bool,
    /// True when the mutation was only queued for later processing.
    pub queued: bool,
    pub new_balance: Option<BigDecimal>,
    pub timestamp: DateTime<Utc>,
}

/// Fallback policy provider for the account service dependency.
#[derive(Debug, Clone, Default)]
pub struct FallbackPolicies;

impl FallbackPolicies {
    /// Read-path fallback: assume the account exists, balance unknown.
    pub fn account_validation(&self, account_id: Uuid) -> AccountValidation {
        tracing::warn!(
            account_id = %account_id,
            "account validation fallback: assuming valid, balance unknown"
        );
        AccountValidation {
            account_id,
            valid: true,
            balance: None,
            degraded: true,
        }
    }

    /// Write-path fallback: the mutation is queued, never confirmed.
    pub fn balance_mutation(
        &self,
        account_id: Uuid,
        amount: &BigDecimal,
        reason: &str,
    ) -> BalanceMutation {
        tracing::warn!(
            account_id = %account_id,
            amount = %amount,
            reason,
            "balance mutation fallback: queued, unconfirmed"
        );
        BalanceMutation {
            account_id,
            confirmed: false,
            queued: true,
            new_balance: None,
            timestamp: Utc::now(),
        }
    }
}
