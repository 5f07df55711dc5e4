use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = match &state.db_pool {
        Some(pool) => probe_database(pool).await,
        None => true,
    };

    let status = if db_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "now": Utc::now().to_rfc3339(),
        "db": db_ok,
        "store_configured": state.store.is_some(),
        "pipeline_running": state.pipeline_runs.snapshot().is_none(),
    }))
}

/// `SELECT 1` bounded at three seconds.
async fn probe_database(pool: &sqlx::PgPool) -> bool {
    match tokio::time::timeout(
        Duration::from_secs(3),
        sqlx::query("SELECT 1").fetch_one(pool),
    )
    .await
    {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Health check DB query failed");
            false
        }
        Err(_) => {
            tracing::error!("Health check DB query timed out (3s)");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;

    use super::health;
    use crate::{
        config::AppConfig, repository::memory_store::InMemoryKpiStore, state::AppState,
    };

    #[tokio::test]
    async fn healthy_without_database() {
        let state = AppState::with_store(AppConfig::for_tests(), Arc::new(InMemoryKpiStore::new()));
        let body = health(State(state)).await.0;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store_configured"], true);
        assert_eq!(body["pipeline_running"], false);
    }
}
