//! Decoding of raw tap messages into [`LifecycleEvent`]s.
//!
//! The tap API renders its protobuf events as JSON, so 64-bit integers may
//! arrive as strings and unset fields are simply absent. Only the pieces the
//! engine cannot work without are required: one http event, a correlation
//! id, and both endpoints.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use crate::error::ParseError;
use crate::event::{
    Direction, Endpoint, Eos, EventKind, LifecycleEvent, RequestInit, ResponseEnd, ResponseInit,
    parse_duration_secs,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(default)]
    id: Option<WireScalar>,
    #[serde(default)]
    proxy_direction: Option<String>,
    #[serde(default)]
    source: Option<WireAddr>,
    #[serde(default)]
    source_meta: Option<WireMeta>,
    #[serde(default)]
    destination: Option<WireAddr>,
    #[serde(default)]
    destination_meta: Option<WireMeta>,
    #[serde(default)]
    http: Option<WireHttp>,
}

/// A number that protobuf JSON may render either bare or quoted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireScalar {
    Number(u64),
    Text(String),
}

impl WireScalar {
    fn as_u64(&self, field: &'static str) -> Result<u64, ParseError> {
        match self {
            WireScalar::Number(n) => Ok(*n),
            WireScalar::Text(s) => s.trim().parse().map_err(|_| ParseError::InvalidField {
                field,
                value: s.clone(),
            }),
        }
    }

    fn into_key(self) -> String {
        match self {
            WireScalar::Number(n) => n.to_string(),
            WireScalar::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireAddr {
    Text(String),
    Tcp {
        #[serde(default)]
        ip: Option<WireIp>,
        #[serde(default)]
        port: u32,
    },
}

#[derive(Debug, Deserialize)]
struct WireIp {
    #[serde(default)]
    ipv4: Option<u32>,
    #[serde(default)]
    ipv6: Option<WireIpv6>,
}

#[derive(Debug, Deserialize)]
struct WireIpv6 {
    first: WireScalar,
    last: WireScalar,
}

#[derive(Debug, Default, Deserialize)]
struct WireMeta {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHttp {
    #[serde(default)]
    request_init: Option<WireRequestInit>,
    #[serde(default)]
    response_init: Option<WireResponseInit>,
    #[serde(default)]
    response_end: Option<WireResponseEnd>,
}

#[derive(Debug, Deserialize)]
struct WireStreamId {
    #[serde(default)]
    base: Option<WireScalar>,
    #[serde(default)]
    stream: Option<WireScalar>,
}

#[derive(Debug, Default, Deserialize)]
struct WireRegistered {
    #[serde(default)]
    registered: Option<String>,
    #[serde(default)]
    unregistered: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRequestInit {
    #[serde(default)]
    id: Option<WireStreamId>,
    #[serde(default)]
    method: Option<WireRegistered>,
    #[serde(default)]
    scheme: Option<WireRegistered>,
    #[serde(default)]
    authority: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponseInit {
    #[serde(default)]
    id: Option<WireStreamId>,
    #[serde(default)]
    since_request_init: Option<String>,
    #[serde(default)]
    http_status: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponseEnd {
    #[serde(default)]
    id: Option<WireStreamId>,
    #[serde(default)]
    since_request_init: Option<String>,
    #[serde(default)]
    since_response_init: Option<String>,
    #[serde(default)]
    response_bytes: Option<WireScalar>,
    #[serde(default)]
    eos: Option<WireEos>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEos {
    #[serde(default)]
    grpc_status_code: Option<u32>,
    #[serde(default)]
    reset_error_code: Option<u32>,
}

/// Decode one tap message. Pure; `received_at` is stamped onto the event.
pub fn parse_event(raw: &str, received_at: Instant) -> Result<LifecycleEvent, ParseError> {
    let wire: WireEvent =
        serde_json::from_str(raw).map_err(|e| ParseError::Json(e.to_string()))?;

    let http = wire.http.ok_or(ParseError::MissingHttpEvent)?;
    let (kind, stream_id) = match (http.request_init, http.response_init, http.response_end) {
        (Some(init), None, None) => {
            let id = init.id;
            let kind = EventKind::RequestInit(RequestInit {
                method: registered_name(init.method),
                scheme: registered_name(init.scheme),
                authority: init.authority,
                path: init.path,
            });
            (kind, id)
        }
        (None, Some(init), None) => {
            let http_status = init
                .http_status
                .map(|status| {
                    u16::try_from(status).map_err(|_| ParseError::InvalidField {
                        field: "httpStatus",
                        value: status.to_string(),
                    })
                })
                .transpose()?;
            let kind = EventKind::ResponseInit(ResponseInit {
                http_status,
                since_request_init: duration_field(
                    "responseInit.sinceRequestInit",
                    init.since_request_init.as_deref(),
                )?,
            });
            (kind, init.id)
        }
        (None, None, Some(end)) => {
            let eos = end.eos.and_then(|eos| match (eos.grpc_status_code, eos.reset_error_code) {
                (Some(code), _) => Some(Eos::GrpcStatus(code)),
                (None, Some(code)) => Some(Eos::ResetError(code)),
                (None, None) => None,
            });
            let response_bytes = end
                .response_bytes
                .map(|bytes| bytes.as_u64("responseBytes"))
                .transpose()?
                .unwrap_or(0);
            let kind = EventKind::ResponseEnd(ResponseEnd {
                eos,
                response_bytes,
                since_request_init: duration_field(
                    "responseEnd.sinceRequestInit",
                    end.since_request_init.as_deref(),
                )?,
                since_response_init: duration_field(
                    "responseEnd.sinceResponseInit",
                    end.since_response_init.as_deref(),
                )?,
            });
            (kind, end.id)
        }
        (None, None, None) => return Err(ParseError::MissingHttpEvent),
        _ => return Err(ParseError::AmbiguousHttpEvent),
    };

    let request_id = match (wire.id, stream_id) {
        (Some(envelope), _) => envelope.into_key(),
        (None, Some(WireStreamId { base: Some(base), stream })) => {
            let stream = stream.map(|s| s.as_u64("id.stream")).transpose()?.unwrap_or(0);
            format!("{}:{}", base.as_u64("id.base")?, stream)
        }
        _ => return Err(ParseError::MissingId),
    };

    let direction = match wire.proxy_direction.as_deref() {
        Some("INBOUND") => Direction::Inbound,
        Some("OUTBOUND") | Some("UNKNOWN") | None => Direction::Outbound,
        Some(other) => {
            return Err(ParseError::InvalidField {
                field: "proxyDirection",
                value: other.to_string(),
            });
        }
    };

    let source_labels = wire.source_meta.unwrap_or_default().labels;
    let destination_labels = wire.destination_meta.unwrap_or_default().labels;
    let tls = match direction {
        Direction::Inbound => source_labels.get("tls").cloned(),
        Direction::Outbound => destination_labels.get("tls").cloned(),
    };

    let source_addr = render_addr("source", wire.source.ok_or(ParseError::MissingField("source"))?)?;
    let destination_addr = render_addr(
        "destination",
        wire.destination.ok_or(ParseError::MissingField("destination"))?,
    )?;

    Ok(LifecycleEvent {
        request_id,
        kind,
        direction,
        source: Endpoint::new(source_addr, source_labels),
        destination: Endpoint::new(destination_addr, destination_labels),
        tls,
        received_at,
    })
}

fn registered_name(value: Option<WireRegistered>) -> String {
    let value = value.unwrap_or_default();
    value.registered.or(value.unregistered).unwrap_or_default()
}

fn duration_field(field: &'static str, raw: Option<&str>) -> Result<f64, ParseError> {
    match raw {
        None => Ok(0.0),
        Some(raw) => parse_duration_secs(raw).ok_or_else(|| ParseError::InvalidField {
            field,
            value: raw.to_string(),
        }),
    }
}

fn render_addr(field: &'static str, addr: WireAddr) -> Result<String, ParseError> {
    match addr {
        WireAddr::Text(text) => Ok(text),
        WireAddr::Tcp { ip, port } => {
            let port = u16::try_from(port).map_err(|_| ParseError::InvalidField {
                field,
                value: port.to_string(),
            })?;
            let ip = match ip {
                Some(WireIp { ipv4: Some(v4), .. }) => IpAddr::V4(Ipv4Addr::from(v4)),
                Some(WireIp { ipv6: Some(v6), .. }) => {
                    let first = v6.first.as_u64(field)?;
                    let last = v6.last.as_u64(field)?;
                    IpAddr::V6(Ipv6Addr::from(((first as u128) << 64) | last as u128))
                }
                _ => return Err(ParseError::MissingField(field)),
            };
            Ok(SocketAddr::new(ip, port).to_string())
        }
    }
}
