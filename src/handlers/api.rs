//! Plain HTTP endpoints.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::Value;

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus<'a> {
    status: &'static str,
    active_sessions: usize,
    stt_url: &'a str,
    llm_model: &'a str,
    tts_url: &'a str,
}

/// Liveness probe with a peek at current load and collaborator wiring.
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let status = HealthStatus {
        status: "ok",
        active_sessions: state.registry.len(),
        stt_url: &state.config.stt_url,
        llm_model: &state.config.llm_model,
        tts_url: &state.config.tts_url,
    };
    Ok(Json(serde_json::to_value(status)?))
}
