use serde::Serialize;
use taptop_core::config::TapConfig;

/// Identifier the tap endpoint uses to tell top subscriptions apart.
pub const SUBSCRIPTION_ID: &str = "top-web";

/// Upper bound on the requested event rate, and the default.
pub const MAX_RPS: f64 = 100.0;

/// Request sent once when the tap stream opens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub id: &'static str,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    pub max_rps: f64,
}

impl SubscriptionRequest {
    pub fn from_config(config: &TapConfig) -> Self {
        Self {
            id: SUBSCRIPTION_ID,
            resource: config.resource.clone(),
            namespace: non_empty(&config.namespace),
            to_resource: non_empty(&config.to_resource),
            to_namespace: non_empty(&config.to_namespace),
            method: non_empty(&config.method),
            path: non_empty(&config.path),
            authority: non_empty(&config.authority),
            scheme: non_empty(&config.scheme),
            max_rps: effective_max_rps(config.max_rps),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Clamp a requested rate into `(0, MAX_RPS]`; anything unusable falls back
/// to `MAX_RPS`.
pub fn effective_max_rps(requested: Option<f64>) -> f64 {
    match requested {
        Some(rps) if rps.is_finite() && rps > 0.0 => rps.min(MAX_RPS),
        _ => MAX_RPS,
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}
