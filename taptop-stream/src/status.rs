use serde::Serialize;
use taptop_core::TapError;
use taptop_core::config::TapConfig;
use taptop_engine::{Neighbor, SessionStats, TopSnapshot};

use crate::controller::StreamState;

/// Error shown alongside the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBanner {
    pub kind: &'static str,
    pub message: String,
}

impl From<&TapError> for ErrorBanner {
    fn from(err: &TapError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Everything a renderer needs about the tap stream.
#[derive(Debug, Clone, Serialize)]
pub struct TapStatus {
    pub state: StreamState,
    pub resource: String,
    /// Kind part of `resource`, e.g. `deployment`.
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBanner>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_parse_error: Option<String>,
    pub stats: SessionStats,
    /// Latest published snapshot of the current or most recent session.
    pub snapshot: Option<TopSnapshot>,
    pub neighbors: Vec<Neighbor>,
}

impl TapStatus {
    /// Status before anything has been started.
    pub fn idle(tap: &TapConfig) -> Self {
        Self {
            state: StreamState::Idle,
            resource: tap.resource.clone(),
            resource_type: tap.resource_type().to_string(),
            error: None,
            last_parse_error: None,
            stats: SessionStats::default(),
            snapshot: None,
            neighbors: Vec::new(),
        }
    }
}
