use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    schemas::{
        parse_optional_uuid, parse_period_month, validate_input, InternalSummaryQuery,
        PartnerSummaryQuery,
    },
    services::kpi_summary::{
        available_months, internal_summary, latest_computed_month, partner_summary,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/kpis/months", axum::routing::get(list_months))
        .route("/kpis/latest-month", axum::routing::get(latest_month))
        .route(
            "/kpis/internal-summary",
            axum::routing::get(internal_summary_report),
        )
        .route(
            "/kpis/partner-summary",
            axum::routing::get(partner_summary_report),
        )
}

async fn list_months(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let months = available_months(state.store()?).await?;
    Ok(Json(json!({
        "data": months.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })))
}

async fn latest_month(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let latest = latest_computed_month(state.store()?).await?;
    Ok(Json(json!({ "period_month": latest.map(|month| month.to_string()) })))
}

async fn internal_summary_report(
    State(state): State<AppState>,
    Query(query): Query<InternalSummaryQuery>,
) -> AppResult<Json<Value>> {
    validate_input(&query)?;
    let period_month = parse_period_month(&query.period_month)?;
    let cache_key = format!("internal:{period_month}");
    if let Some(cached) = state.kpi_summary_cache.get(&cache_key).await {
        return Ok(Json(cached));
    }

    let snapshot = state.pipeline_runs.snapshot();
    let summary = internal_summary(state.store()?, period_month).await?;
    let body = to_body(&summary)?;
    cache_if_settled(&state, snapshot, cache_key, &body).await;
    Ok(Json(body))
}

async fn partner_summary_report(
    State(state): State<AppState>,
    Query(query): Query<PartnerSummaryQuery>,
) -> AppResult<Json<Value>> {
    validate_input(&query)?;
    let period_month = parse_period_month(&query.period_month)?;
    let org_id = parse_optional_uuid("org_id", query.org_id.as_deref())?;
    let building_id = parse_optional_uuid("building_id", query.building_id.as_deref())?;
    let cache_key = format!(
        "partner:{period_month}:{}:{}",
        org_id.map(|id| id.to_string()).unwrap_or_default(),
        building_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    if let Some(cached) = state.kpi_summary_cache.get(&cache_key).await {
        return Ok(Json(cached));
    }

    let snapshot = state.pipeline_runs.snapshot();
    let units = partner_summary(state.store()?, period_month, org_id, building_id).await?;
    let body = json!({
        "period_month": period_month.to_string(),
        "data": to_body(&units)?,
    });
    cache_if_settled(&state, snapshot, cache_key, &body).await;
    Ok(Json(body))
}

/// Skips caching when a pipeline run overlapped the read.
async fn cache_if_settled(state: &AppState, snapshot: Option<u64>, key: String, body: &Value) {
    if state.pipeline_runs.settled_since(snapshot) {
        state.kpi_summary_cache.insert(key, body.clone()).await;
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value)
        .map_err(|error| AppError::Internal(format!("Could not serialize KPI summary: {error}")))
}
