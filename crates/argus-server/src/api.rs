use argus_engine::{Engine, EngineError};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub start_time: DateTime<Utc>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/system/health", get(system_health))
        .route("/v1/probes", get(list_probes))
        .route("/v1/probes/{id}/state", get(probe_state))
        .route("/v1/probes/{id}/runs", get(probe_runs))
        .route("/v1/probes/{id}/run", post(run_probe))
        .route("/v1/probes/{id}/enable", post(enable_probe))
        .route("/v1/probes/{id}/disable", post(disable_probe))
        .route("/v1/probes/{id}/mute", post(mute_probe))
        .route("/v1/probes/{id}/unmute", post(unmute_probe))
        .route("/v1/alerts/recent", get(recent_alerts))
        .route("/v1/runs/recent", get(recent_runs))
        .with_state(state)
}

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::ProbeNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Admin API internal error");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Deserialize)]
struct MuteQuery {
    minutes: u64,
}

async fn system_health(State(state): State<AppState>) -> impl IntoResponse {
    let platforms = state.engine.platform_health().await;
    let healthy = platforms.values().all(|ok| *ok);
    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "uptime_secs": (Utc::now() - state.start_time).num_seconds(),
        "platforms": platforms,
    }))
}

async fn list_probes(State(state): State<AppState>) -> impl IntoResponse {
    let running = state.engine.running_probes();
    let probes: Vec<_> = state
        .engine
        .list_probes()
        .iter()
        .map(|descriptor| {
            json!({
                "id": descriptor.id,
                "platform": descriptor.platform,
                "type": descriptor.probe_type,
                "interval": descriptor.interval,
                "timeout": descriptor.timeout,
                "rules": descriptor.rules.len(),
                "enabled": state.engine.is_enabled(&descriptor.id),
                "running": running.contains(&descriptor.id),
            })
        })
        .collect();
    Json(probes)
}

async fn probe_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let probe_state = state.engine.load_probe_state(&id)?;
    Ok(Json(probe_state))
}

async fn probe_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.runs_for_probe(&id, query.limit)?))
}

async fn run_probe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.run_once(&id).await?;
    Ok(Json(json!({ "status": "ran" })))
}

async fn enable_probe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.enable(&id)?;
    Ok(Json(json!({ "status": "enabled" })))
}

async fn disable_probe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.disable(&id)?;
    Ok(Json(json!({ "status": "disabled" })))
}

async fn mute_probe(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MuteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.mute(&id, query.minutes)?;
    Ok(Json(json!({ "status": "muted", "minutes": query.minutes })))
}

async fn unmute_probe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.unmute(&id)?;
    Ok(Json(json!({ "status": "unmuted" })))
}

async fn recent_alerts(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.recent_alerts(query.limit)?))
}

async fn recent_runs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.recent_runs(query.limit)?))
}
