use crate::server::AdminState;
use axum::extract::State;
use axum::response::Json;
use std::sync::Arc;
use taptop_stream::TapStatus;

/// Latest published status, including the top-routes snapshot.
pub async fn get_top(State(state): State<Arc<AdminState>>) -> Json<TapStatus> {
    Json(state.tap.status())
}
