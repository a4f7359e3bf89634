use crate::handlers;
use axum::{
    Router as AxumRouter,
    extract::State,
    routing::{get, post},
};
use std::sync::Arc;
use taptop_core::config::AdminConfig;
use taptop_observability::MetricsCollector;
use taptop_stream::TapHandle;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for the HTTP API.
pub struct AdminState {
    pub tap: TapHandle,
    pub metrics: Arc<MetricsCollector>,
}

/// Build the router with every API route. `metrics_path` is where the
/// prometheus text is served.
pub fn build_admin_router(state: Arc<AdminState>, metrics_path: &str) -> AxumRouter {
    let api = AxumRouter::new()
        .route("/health", get(handlers::health::health_check))
        .route("/top", get(handlers::top::get_top))
        .route("/tap/start", post(handlers::tap::start_tap))
        .route("/tap/stop", post(handlers::tap::stop_tap));

    AxumRouter::new()
        .nest("/api", api)
        .route(metrics_path, get(metrics_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn start_admin(
    config: AdminConfig,
    metrics_path: String,
    state: Arc<AdminState>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("HTTP API disabled");
        return Ok(());
    }

    let app = build_admin_router(state, &metrics_path);
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!(addr = %config.addr, "Starting HTTP API server");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler(State(state): State<Arc<AdminState>>) -> String {
    state.metrics.render()
}
