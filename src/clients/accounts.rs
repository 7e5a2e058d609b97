//! HTTP client for the account service.
//!
//! Every call goes through the `accounts-service` circuit breaker. A
//! rejected call resolves to the dependency's fallback policy where one is
//! defined; non-2xx responses and timeouts are breaker-recordable failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::breaker::fallback::{AccountValidation, BalanceMutation, FallbackPolicies};
use crate::breaker::{BreakerError, BreakerRegistry, ACCOUNTS_DEPENDENCY};
use crate::ports::{Account, AccountError, AccountsApi};

/// Failure of a single HTTP attempt, before breaker mapping.
#[derive(Error, Debug)]
enum CallError {
    #[error("account {0} not found")]
    NotFound(Uuid),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: BigDecimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    confirmed: bool,
    new_balance: Option<BigDecimal>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationRequest<'a> {
    amount: &'a BigDecimal,
    reason: &'a str,
}

#[derive(Clone)]
pub struct HttpAccountClient {
    http: Client,
    base_url: String,
    registry: Arc<BreakerRegistry>,
    fallbacks: FallbackPolicies,
}

impl HttpAccountClient {
    pub fn new(base_url: String, registry: Arc<BreakerRegistry>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url,
            registry,
            fallbacks: FallbackPolicies,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_account(&self, id: Uuid) -> Result<Account, CallError> {
        let response = self
            .http
            .get(self.url(&format!("/api/accounts/{id}")))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CallError::NotFound(id)),
            status if status.is_success() => Ok(response.json::<Account>().await?),
            status => Err(CallError::Status(status)),
        }
    }

    async fn fetch_balance(&self, id: Uuid) -> Result<BalanceResponse, CallError> {
        let response = self
            .http
            .get(self.url(&format!("/api/accounts/{id}/balance")))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CallError::NotFound(id)),
            status if status.is_success() => Ok(response.json::<BalanceResponse>().await?),
            status => Err(CallError::Status(status)),
        }
    }

    async fn patch_balance(
        &self,
        id: Uuid,
        amount: &BigDecimal,
        reason: &str,
    ) -> Result<MutationResponse, CallError> {
        let response = self
            .http
            .patch(self.url(&format!("/api/accounts/{id}/balance")))
            .json(&MutationRequest { amount, reason })
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CallError::NotFound(id)),
            status if status.is_success() => Ok(response.json::<MutationResponse>().await?),
            status => Err(CallError::Status(status)),
        }
    }
}

fn map_error(e: BreakerError<CallError>) -> AccountError {
    match e {
        BreakerError::Rejected => {
            AccountError::Unavailable("accounts-service circuit breaker is open".to_string())
        }
        BreakerError::Timeout => AccountError::Unavailable("accounts-service call timed out".to_string()),
        BreakerError::Inner(CallError::NotFound(id)) => AccountError::NotFound(id),
        BreakerError::Inner(CallError::Transport(e)) => AccountError::Unavailable(e.to_string()),
        BreakerError::Inner(CallError::Status(status)) => {
            AccountError::Upstream(format!("unexpected status {status}"))
        }
    }
}

#[async_trait]
impl AccountsApi for HttpAccountClient {
    async fn get_account(&self, id: Uuid) -> Result<Account, AccountError> {
        self.registry
            .call(ACCOUNTS_DEPENDENCY, self.fetch_account(id))
            .await
            .map_err(map_error)
    }

    async fn validate_account(&self, id: Uuid) -> Result<AccountValidation, AccountError> {
        let result = self
            .registry
            .call(ACCOUNTS_DEPENDENCY, self.fetch_balance(id))
            .await;

        match result {
            Ok(response) => Ok(AccountValidation {
                account_id: id,
                valid: true,
                balance: Some(response.balance),
                degraded: false,
            }),
            // Breaker open: degrade to the read-path fallback.
            Err(BreakerError::Rejected) => Ok(self.fallbacks.account_validation(id)),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn update_balance(
        &self,
        id: Uuid,
        amount: BigDecimal,
        reason: &str,
    ) -> Result<BalanceMutation, AccountError> {
        let result = self
            .registry
            .call(ACCOUNTS_DEPENDENCY, self.patch_balance(id, &amount, reason))
            .await;

        match result {
            Ok(response) => Ok(BalanceMutation {
                account_id: id,
                confirmed: response.confirmed,
                queued: false,
                new_balance: response.new_balance,
                timestamp: Utc::now(),
            }),
            // Breaker open: the write-path fallback queues, never confirms.
            Err(BreakerError::Rejected) => Ok(self.fallbacks.balance_mutation(id, &amount, reason)),
            Err(e) => Err(map_error(e)),
        }
    }
}
