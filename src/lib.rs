pub mod breaker;
pub mod clients;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod ports;
pub mod services;
pub mod startup;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::breaker::BreakerRegistry;
use crate::services::TransferService;

#[derive(Clone)]
pub struct AppState {
    pub transfers: Arc<TransferService>,
    pub breakers: Arc<BreakerRegistry>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/transactions",
            post(handlers::transactions::create).get(handlers::transactions::list),
        )
        .route(
            "/api/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/api/transactions/:id/reverse",
            post(handlers::transactions::reverse),
        )
        .route("/api/breakers", get(handlers::breakers::list))
        .route("/api/breakers/:name", get(handlers::breakers::get_stats))
        .with_state(state)
}
