use crate::server::AdminState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};
use std::sync::Arc;
use taptop_stream::TapCommand;
use tracing::warn;

pub async fn start_tap(State(state): State<Arc<AdminState>>) -> (StatusCode, Json<Value>) {
    submit(&state, TapCommand::Start).await
}

pub async fn stop_tap(State(state): State<Arc<AdminState>>) -> (StatusCode, Json<Value>) {
    submit(&state, TapCommand::Stop).await
}

/// Commands are applied by the driver task; the response only confirms
/// they were queued. Poll `/api/top` for the resulting state.
async fn submit(state: &AdminState, command: TapCommand) -> (StatusCode, Json<Value>) {
    match state.tap.send(command).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "accepted": format!("{command:?}").to_lowercase() })),
        ),
        Err(e) => {
            warn!(error = %e, ?command, "Tap command rejected");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error_msg": e.to_string() })),
            )
        }
    }
}
