use axum::{routing::get, Router};

use crate::{error::AppError, state::AppState};

pub mod health;
pub mod kpis;
pub mod pipelines;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(pipelines::router())
        .merge(kpis::router())
        .fallback(not_found)
}

async fn not_found() -> AppError {
    AppError::NotFound("Route not found.".to_string())
}
