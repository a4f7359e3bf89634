use serde::{Deserialize, Serialize};

use crate::event::Eos;

/// gRPC status code `OK`.
pub const GRPC_OK: u32 = 0;

/// Verdict for one completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Classify a completed request from its response status and trailer.
///
/// gRPC reports failures with HTTP 200, so a 2xx/3xx/4xx status is only a
/// success if the trailer agrees: a gRPC status other than OK, or a stream
/// reset without any gRPC status, turns it into a failure. A missing status
/// (the response-init was never seen) counts as a failure.
pub fn classify(http_status: Option<u16>, eos: Option<&Eos>) -> Outcome {
    let mut success = http_status.is_some_and(|status| status < 500);
    if success {
        match eos {
            Some(Eos::GrpcStatus(code)) => success = *code == GRPC_OK,
            Some(Eos::ResetError(_)) => success = false,
            None => {}
        }
    }
    if success { Outcome::Success } else { Outcome::Failure }
}
