use thiserror::Error;

/// Unified error type for taptop.
#[derive(Error, Debug)]
pub enum TapError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Websocket error: {0}")]
    Connection(String),

    #[error("{}", close_error_message(*code, reason))]
    UncleanClose { code: u16, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Why a raw tap message could not become a lifecycle event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("message carries no http event")]
    MissingHttpEvent,

    #[error("message carries more than one http event")]
    AmbiguousHttpEvent,

    #[error("message carries no correlation id")]
    MissingId,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl TapError {
    /// Short machine-readable kind, used for status reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            TapError::Parse(_) => "parse",
            TapError::Connection(_) => "connection",
            TapError::UncleanClose { .. } => "unclean_close",
            TapError::Config(_) => "config",
            TapError::Io(_) => "io",
            TapError::Serde(_) => "serde",
        }
    }
}

/// Standard websocket close code names.
pub fn close_code_description(code: u16) -> &'static str {
    match code {
        1000 => "Normal Closure",
        1001 => "Going Away",
        1002 => "Protocol Error",
        1003 => "Unsupported Data",
        1004 => "Reserved",
        1005 => "No Status Recvd",
        1006 => "Abnormal Closure",
        1007 => "Invalid frame payload data",
        1008 => "Policy Violation",
        1009 => "Message too big",
        1010 => "Missing Extension",
        1011 => "Internal Error",
        1012 => "Service Restart",
        1013 => "Try Again Later",
        1014 => "Bad Gateway",
        1015 => "TLS Handshake",
        _ => "Unknown",
    }
}

fn close_error_message(code: u16, reason: &str) -> String {
    let description = close_code_description(code);
    if reason.is_empty() {
        format!("Websocket close error [{code}: {description}]")
    } else {
        format!("Websocket close error [{code}: {description}] : {reason}")
    }
}
