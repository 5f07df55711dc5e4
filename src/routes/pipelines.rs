use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    middleware::internal_key::require_internal_key,
    schemas::{parse_date, RunPipelinesQuery},
    services::pipelines::run_exclusive,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/pipelines/run", axum::routing::post(run_pipelines))
}

async fn run_pipelines(
    State(state): State<AppState>,
    Query(query): Query<RunPipelinesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    require_internal_key(&state.config, &headers)?;
    let store = state.store()?;
    let as_of = match query.as_of.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_date(raw)?,
        _ => Utc::now().date_naive(),
    };

    let ticket = state.pipeline_runs.begin();
    let result = run_exclusive(
        &state.pipeline_lock,
        store,
        &state.config.pipeline_config(),
        as_of,
    )
    .await;
    // A failed run may have replaced some KPIs already.
    state.kpi_summary_cache.invalidate_all();
    drop(ticket);
    let summary = result?;

    Ok(Json(json!({
        "status": "completed",
        "as_of": as_of.to_string(),
        "summary": summary,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        extract::{Query, State},
        http::{HeaderMap, HeaderValue},
    };
    use serde_json::json;

    use super::run_pipelines;
    use crate::{
        config::AppConfig,
        error::AppError,
        middleware::internal_key::INTERNAL_API_KEY_HEADER,
        repository::memory_store::InMemoryKpiStore,
        schemas::RunPipelinesQuery,
        state::AppState,
    };

    fn keyed_state() -> AppState {
        let mut config = AppConfig::for_tests();
        config.internal_api_key = Some("k".to_string());
        AppState::with_store(config, Arc::new(InMemoryKpiStore::new()))
    }

    #[tokio::test]
    async fn rejects_missing_key() {
        let result = run_pipelines(
            State(keyed_state()),
            Query(RunPipelinesQuery::default()),
            HeaderMap::new(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn runs_and_clears_summary_cache() {
        let state = keyed_state();
        state
            .kpi_summary_cache
            .insert("internal:2025-03-01".to_string(), json!({"stale": true}))
            .await;
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_API_KEY_HEADER, HeaderValue::from_static("k"));

        let body = run_pipelines(
            State(state.clone()),
            Query(RunPipelinesQuery {
                as_of: Some("2025-03-15".to_string()),
            }),
            headers,
        )
        .await
        .expect("run succeeds")
        .0;

        assert_eq!(body["status"], "completed");
        assert_eq!(body["as_of"], "2025-03-15");
        assert_eq!(body["summary"]["staged"], 0);
        assert!(state
            .kpi_summary_cache
            .get("internal:2025-03-01")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn rejects_bad_as_of() {
        let state = AppState::with_store(AppConfig::for_tests(), Arc::new(InMemoryKpiStore::new()));
        let result = run_pipelines(
            State(state),
            Query(RunPipelinesQuery {
                as_of: Some("yesterday".to_string()),
            }),
            HeaderMap::new(),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
