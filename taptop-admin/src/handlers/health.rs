use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use serde_json::{Value, json};
use std::sync::Arc;

pub async fn health_check(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let status = state.tap.status();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "stream": status.state,
        "resource": status.resource,
        "resource_type": status.resource_type,
        "metrics": state.metrics.is_enabled(),
    }))
}
