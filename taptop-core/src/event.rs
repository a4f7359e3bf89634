use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Label keys that name the owning workload of a pod, in lookup order.
pub const RESOURCE_KINDS: &[&str] = &[
    "deployment",
    "daemonset",
    "statefulset",
    "replicationcontroller",
    "replicaset",
    "job",
    "cronjob",
    "pod",
];

/// Which side of the proxy observed the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("INBOUND"),
            Direction::Outbound => f.write_str("OUTBOUND"),
        }
    }
}

/// One side of a tapped request: its socket address plus kubernetes metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// `ip:port` rendering of the address. Used as the aggregation identity.
    pub addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Endpoint {
    /// Build an endpoint from an address and its raw label map.
    pub fn new(addr: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        let (resource_kind, resource_name) = RESOURCE_KINDS
            .iter()
            .find_map(|kind| labels.get(*kind).map(|name| (kind.to_string(), name.clone())))
            .unzip();
        Self {
            addr: addr.into(),
            namespace: labels.get("namespace").cloned(),
            resource_kind,
            resource_name,
            pod: labels.get("pod").cloned(),
            labels,
        }
    }

    pub fn identity(&self) -> &str {
        &self.addr
    }
}

/// End-of-stream trailer of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eos {
    GrpcStatus(u32),
    ResetError(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInit {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInit {
    pub http_status: Option<u16>,
    /// Seconds since the request started.
    pub since_request_init: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnd {
    pub eos: Option<Eos>,
    pub response_bytes: u64,
    /// Seconds since the request started; this is the request latency.
    pub since_request_init: f64,
    pub since_response_init: f64,
}

/// Stage-specific payload of a lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    RequestInit(RequestInit),
    ResponseInit(ResponseInit),
    ResponseEnd(ResponseEnd),
}

/// Discriminant of [`EventKind`], used to key per-stage slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    RequestInit,
    ResponseInit,
    ResponseEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequestInit => "request_init",
            EventType::ResponseInit => "response_init",
            EventType::ResponseEnd => "response_end",
        }
    }
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::RequestInit(_) => EventType::RequestInit,
            EventKind::ResponseInit(_) => EventType::ResponseInit,
            EventKind::ResponseEnd(_) => EventType::ResponseEnd,
        }
    }
}

/// One decoded tap message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub request_id: String,
    pub kind: EventKind,
    pub direction: Direction,
    pub source: Endpoint,
    pub destination: Endpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<String>,
    /// Arrival time; only eviction bookkeeping reads it.
    #[serde(skip)]
    pub received_at: Instant,
}

impl LifecycleEvent {
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn request_init(&self) -> Option<&RequestInit> {
        match &self.kind {
            EventKind::RequestInit(init) => Some(init),
            _ => None,
        }
    }

    pub fn response_init(&self) -> Option<&ResponseInit> {
        match &self.kind {
            EventKind::ResponseInit(init) => Some(init),
            _ => None,
        }
    }

    pub fn response_end(&self) -> Option<&ResponseEnd> {
        match &self.kind {
            EventKind::ResponseEnd(end) => Some(end),
            _ => None,
        }
    }
}

/// Parse a duration rendered as decimal seconds with a unit suffix (`"0.0123s"`).
pub fn parse_duration_secs(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix('s').unwrap_or(trimmed);
    number.parse::<f64>().ok().filter(|secs| secs.is_finite() && *secs >= 0.0)
}
