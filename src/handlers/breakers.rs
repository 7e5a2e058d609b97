use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::AppState;

/// Stats for every dependency that has been called at least once.
pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.breakers.all_stats())
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match state.breakers.stats(&name) {
        Some(stats) => Ok(Json(stats)),
        None => Err(AppError::NotFound(format!(
            "no circuit breaker for dependency '{name}'"
        ))),
    }
}
