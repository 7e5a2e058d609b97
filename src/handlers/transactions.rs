use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub sender_account_id: Uuid,
    pub receiver_account_id: Uuid,
    pub amount: BigDecimal,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub account_id: Uuid,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .transfers
        .create(
            payload.sender_account_id,
            payload.receiver_account_id,
            payload.amount,
            payload.description,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(tx)))
}

pub async fn reverse(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let reversal = state.transfers.reverse(id).await?;
    Ok((StatusCode::CREATED, Json(reversal)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.transfers.get(id).await?;
    Ok(Json(tx))
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .transfers
        .list_for_account(
            params.account_id,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;
    Ok(Json(page))
}
