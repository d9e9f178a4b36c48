//! RPC status codes and the structured error carried in call trailers.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    pub fn from_i32(value: i32) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level failure of an RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    code: Code,
    message: String,
}

impl RpcError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Status the gateway answers with for this error.
    pub fn http_status(&self) -> StatusCode {
        match self.code {
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Read the call outcome from trailers (or trailers-only headers).
    ///
    /// `None` means the map carries no status at all; `Some(Ok(()))` is a
    /// successful call.
    pub fn from_trailers(map: &HeaderMap) -> Option<Result<(), RpcError>> {
        let code = map.get(GRPC_STATUS)?.to_str().ok()?.trim().parse::<i32>().ok()?;
        let code = Code::from_i32(code);
        if code == Code::Ok {
            return Some(Ok(()));
        }
        let message = map
            .get(GRPC_MESSAGE)
            .and_then(|v| v.to_str().ok())
            .map(percent_decode)
            .unwrap_or_default();
        Some(Err(RpcError::new(code, message)))
    }
}

/// Trailers for a call that ended with `result`.
pub fn status_trailers(result: &Result<(), RpcError>) -> HeaderMap {
    let mut map = HeaderMap::new();
    match result {
        Ok(()) => {
            map.insert(GRPC_STATUS, HeaderValue::from_static("0"));
        }
        Err(err) => {
            map.insert(GRPC_STATUS, HeaderValue::from(err.code.as_i32()));
            if let Ok(value) = HeaderValue::from_str(&percent_encode(&err.message)) {
                map.insert(GRPC_MESSAGE, value);
            }
        }
    }
    map
}

/// Controls, `%` and (implicitly) all non-ASCII bytes are escaped.
const MESSAGE_ESCAPES: &AsciiSet = &CONTROLS.add(b'%');

fn percent_encode(message: &str) -> String {
    utf8_percent_encode(message, MESSAGE_ESCAPES).to_string()
}

fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_status_mapping() {
        assert_eq!(RpcError::not_found("x").http_status(), StatusCode::NOT_FOUND);
        assert_eq!(RpcError::invalid_argument("x").http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RpcError::new(Code::PermissionDenied, "x").http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn trailers_carry_code_and_message() {
        let err = RpcError::new(Code::NotFound, "no such key: 100% gone ✓");
        let map = status_trailers(&Err(err.clone()));

        assert_eq!(map.get(GRPC_STATUS).unwrap(), "5");
        assert_eq!(RpcError::from_trailers(&map), Some(Err(err)));
    }

    #[test]
    fn ok_and_missing_status() {
        let ok = status_trailers(&Ok(()));
        assert_eq!(RpcError::from_trailers(&ok), Some(Ok(())));
        assert_eq!(RpcError::from_trailers(&HeaderMap::new()), None);
    }

    #[test]
    fn unknown_numeric_code_is_unknown() {
        assert_eq!(Code::from_i32(42), Code::Unknown);
        assert_eq!(Code::from_i32(14), Code::Unavailable);
    }

    #[test]
    fn stray_percent_survives_decoding() {
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
        assert_eq!(percent_decode("%E2%9C%93"), "✓");
    }

    #[test]
    fn signed_hex_is_not_an_escape() {
        assert_eq!(percent_decode("50%+1 off"), "50%+1 off");
        assert_eq!(percent_decode("%-f"), "%-f");

        let err = RpcError::internal("rate is 50%+1");
        let map = status_trailers(&Err(err.clone()));
        assert_eq!(map.get(GRPC_MESSAGE).unwrap(), "rate is 50%25+1");
        assert_eq!(RpcError::from_trailers(&map), Some(Err(err)));
    }
}
