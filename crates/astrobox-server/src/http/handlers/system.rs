//! System handlers: health, runtime report, format presets

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;

use super::super::types::{ApiError, FormatsResponse, HealthResponse, FORMAT_PRESETS};
use super::AppState;

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.engine.system();
    Json(HealthResponse {
        status: "ok".to_string(),
        time: Utc::now(),
        active_jobs: report.active_jobs,
        queued_jobs: report.queued_jobs,
        active_resource_units: report.active_resource_units,
        resource_budget_units: report.budget.dynamic_unit_budget,
    })
}

pub async fn system(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.system())
}

pub async fn formats() -> impl IntoResponse {
    Json(FormatsResponse {
        presets: FORMAT_PRESETS,
    })
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Not found.")
}
