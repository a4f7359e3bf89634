use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::TapError;

/// Top-level taptop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaptopConfig {
    #[serde(default)]
    pub tap: TapConfig,
    #[serde(default)]
    pub top: TopConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Tap stream endpoint and subscription filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    #[serde(default = "default_tap_url")]
    pub url: String,
    /// Resource to tap, as `<type>/<name>` (e.g. `deployment/web`).
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub to_resource: Option<String>,
    #[serde(default)]
    pub to_namespace: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
    /// Requested events per second. Capped when the subscription is built.
    #[serde(default)]
    pub max_rps: Option<f64>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Limits for the top-routes engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopConfig {
    /// Rows included in each published snapshot.
    #[serde(default = "default_max_rows_to_display")]
    pub max_rows_to_display: usize,
    /// Capacity of both the pending-request index and the aggregated rows.
    #[serde(default = "default_max_rows_to_store")]
    pub max_rows_to_store: usize,
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_addr")]
    pub addr: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// When false, no prometheus counters are updated on the ingest path.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_tap_url() -> String { "ws://127.0.0.1:8084/api/tap".into() }
fn default_resource() -> String { "deployment/web".into() }
fn default_connect_timeout() -> u64 { 5000 }
fn default_max_rows_to_display() -> usize { 40 }
fn default_max_rows_to_store() -> usize { 50 }
fn default_admin_addr() -> String { "127.0.0.1:9995".into() }
fn default_true() -> bool { true }
fn default_metrics_path() -> String { "/metrics".into() }

// ── Impls ─────────────────────────────────────────────────────

impl Default for TaptopConfig {
    fn default() -> Self {
        Self {
            tap: TapConfig::default(),
            top: TopConfig::default(),
            admin: AdminConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            url: default_tap_url(),
            resource: default_resource(),
            namespace: None,
            to_resource: None,
            to_namespace: None,
            method: None,
            path: None,
            authority: None,
            scheme: None,
            max_rps: None,
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for TopConfig {
    fn default() -> Self {
        Self {
            max_rows_to_display: default_max_rows_to_display(),
            max_rows_to_store: default_max_rows_to_store(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            addr: default_admin_addr(),
            enabled: true,
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_metrics_path(),
        }
    }
}

impl TapConfig {
    /// Resource type half of `<type>/<name>`.
    pub fn resource_type(&self) -> &str {
        self.resource.split('/').next().unwrap_or_default()
    }
}

impl TaptopConfig {
    /// Load configuration from YAML file + env overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: TaptopConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("TAPTOP_").split("__"))
            .extract()?;
        config.validate()?;
        debug!(
            path = %path.display(),
            resource = %config.tap.resource,
            url = %config.tap.url,
            "Config loaded"
        );
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), TapError> {
        if self.top.max_rows_to_store == 0 {
            return Err(TapError::Config("top.max_rows_to_store must be at least 1".into()));
        }
        if self.top.max_rows_to_display == 0 {
            return Err(TapError::Config("top.max_rows_to_display must be at least 1".into()));
        }
        if self.tap.resource.trim().is_empty() {
            return Err(TapError::Config("tap.resource must not be empty".into()));
        }
        if !self.tap.url.starts_with("ws://") && !self.tap.url.starts_with("wss://") {
            return Err(TapError::Config(format!(
                "tap.url must be a ws:// or wss:// url, got {}",
                self.tap.url
            )));
        }
        Ok(())
    }
}
