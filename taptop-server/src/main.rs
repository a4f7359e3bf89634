// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  taptop: live top-routes view over a service-mesh tap stream
//
//  Stream:   one tokio task owns the websocket and all aggregation state
//  HTTP API: axum on the same runtime
//  Config:   YAML file + TAPTOP_* environment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use taptop_admin::server::{AdminState, start_admin};
use taptop_core::TaptopConfig;
use taptop_observability::MetricsCollector;
use taptop_stream::spawn_tap;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "taptop", version, about = "Live top routes from a tap stream")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/taptop/taptop.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Tap websocket URL, overrides `tap.url`
    #[arg(long)]
    url: Option<String>,

    /// Resource to tap as `<type>/<name>`, overrides `tap.resource`
    #[arg(short, long)]
    resource: Option<String>,

    /// Namespace of the resource, overrides `tap.namespace`
    #[arg(short, long)]
    namespace: Option<String>,

    /// Wait for `POST /api/tap/start` instead of tapping right away
    #[arg(long)]
    no_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "taptop starting");

    // ── Config ──
    let mut config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        TaptopConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        TaptopConfig::default()
    };
    if let Some(url) = cli.url {
        config.tap.url = url;
    }
    if let Some(resource) = cli.resource {
        config.tap.resource = resource;
    }
    if let Some(namespace) = cli.namespace {
        config.tap.namespace = Some(namespace);
    }
    config.validate()?;

    // ── Metrics ──
    let metrics = Arc::new(MetricsCollector::new(config.observability.prometheus.enabled)?);

    // ── Tap driver ──
    let (tap, driver) = spawn_tap(&config, Arc::clone(&metrics));
    if !cli.no_start {
        tap.start().await?;
    }

    // ── HTTP API ──
    if config.admin.enabled {
        let state = Arc::new(AdminState {
            tap: tap.clone(),
            metrics: Arc::clone(&metrics),
        });
        let admin_config = config.admin.clone();
        let metrics_path = config.observability.prometheus.path.clone();
        tokio::spawn(async move {
            if let Err(e) = start_admin(admin_config, metrics_path, state).await {
                error!(error = %e, "HTTP API failed");
            }
        });
    }

    info!(
        resource = %config.tap.resource,
        url = %config.tap.url,
        api_addr = %config.admin.addr,
        started = !cli.no_start,
        "taptop is ready"
    );

    // ── Graceful shutdown: wait for Ctrl+C ──
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");

    tap.shutdown().await?;
    if let Err(e) = driver.await {
        error!(error = %e, "Tap driver task failed");
    }

    info!("taptop stopped");
    Ok(())
}
