use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error taxonomy. Validation-class errors never touch the
/// ledger; everything after the PENDING insert resolves to a terminal ledger
/// row before one of these reaches the caller.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientFunds(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable tag. Callers branch on this, never on the
    /// human-readable message.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::InsufficientFunds(_) => "insufficient_funds",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Internal(_) => "internal_error",
            AppError::Database(_) => "database_error",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let error = AppError::Validation("Cannot transfer to the same account".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.kind(), "validation_error");
    }

    #[test]
    fn insufficient_funds_maps_to_unprocessable() {
        let error = AppError::InsufficientFunds("balance 10.00 < amount 50.00".to_string());
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error.kind(), "insufficient_funds");
    }

    #[test]
    fn service_unavailable_maps_to_503() {
        let error = AppError::ServiceUnavailable("accounts-service breaker open".to_string());
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.kind(), "service_unavailable");
    }

    #[test]
    fn invalid_state_maps_to_conflict() {
        let error = AppError::InvalidState("only COMPLETED transactions can be reversed".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.kind(), "invalid_state");
    }

    #[test]
    fn internal_and_database_map_to_500() {
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Database("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn not_found_response_status() {
        let error = AppError::NotFound("Transaction not found".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
