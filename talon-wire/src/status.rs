//! RPC status codes and the `Status` triple, plus the HTTP/2 mapping rules
//! that produce one when a peer never sends a `grpc-status` trailer.

use std::fmt;

use crate::metadata::Metadata;

/// The fixed 17-value status code enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
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
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parses a wire `grpc-status` value. Any integer outside the known
    /// range is reported as `Unknown`, matching how peers that send a status
    /// code from a newer enum should degrade gracefully.
    pub fn from_i32(value: i32) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
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
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
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
        };
        f.write_str(name)
    }
}

/// A status triple: `(code, details, metadata)`. Cheap to clone; the
/// metadata is typically empty or small (a handful of trailer entries).
#[derive(Debug, Clone)]
pub struct Status {
    pub code: Code,
    pub details: String,
    pub metadata: Metadata,
}

impl Status {
    pub fn new(code: Code, details: impl Into<String>) -> Self {
        Status {
            code,
            details: details.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn ok() -> Self {
        Status::new(Code::Ok, "")
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.details)
    }
}

impl std::error::Error for Status {}

/// Maps an HTTP `:status` pseudo-header to an RPC status, used only when the
/// peer closed the stream without a `grpc-status` trailer (e.g. an
/// intermediary proxy rejected the request before it reached a gRPC server).
/// A `grpc-status` trailer, when present, always overrides this mapping.
pub fn http_status_to_code(status: u16) -> Code {
    match status {
        400 => Code::Internal,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::Unimplemented,
        429 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

/// The HTTP/2 RST_STREAM error codes we give specific RPC-status treatment
/// to. Values follow RFC 7540 §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RstStreamReason {
    RefusedStream,
    Cancel,
    EnhanceYourCalm,
    InadequateSecurity,
    Other(u32),
}

impl RstStreamReason {
    pub fn from_h2_code(code: u32) -> Self {
        match code {
            0x7 => RstStreamReason::RefusedStream,
            0x8 => RstStreamReason::Cancel,
            0xb => RstStreamReason::EnhanceYourCalm,
            0xc => RstStreamReason::InadequateSecurity,
            other => RstStreamReason::Other(other),
        }
    }
}

/// Maps a peer-initiated RST_STREAM into a `Status`. This is the fallback
/// used when the stream is torn down before trailers with a `grpc-status`
/// ever arrive.
pub fn rst_stream_to_status(reason: RstStreamReason) -> Status {
    match reason {
        RstStreamReason::RefusedStream => {
            Status::new(Code::Unavailable, "Stream refused by server")
        }
        RstStreamReason::Cancel => Status::new(Code::Cancelled, "Call cancelled"),
        RstStreamReason::EnhanceYourCalm => Status::new(
            Code::ResourceExhausted,
            "Bandwidth exhausted or memory limit exceeded",
        ),
        RstStreamReason::InadequateSecurity => {
            Status::new(Code::PermissionDenied, "Inadequate security")
        }
        RstStreamReason::Other(code) => {
            Status::new(Code::Internal, format!("Stream reset with code {code}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_through_i32() {
        for i in 0..=16 {
            assert_eq!(Code::from_i32(i).as_i32(), i);
        }
    }

    #[test]
    fn unknown_code_degrades_to_unknown() {
        assert_eq!(Code::from_i32(999), Code::Unknown);
        assert_eq!(Code::from_i32(-1), Code::Unknown);
    }

    #[test]
    fn http_status_mapping_matches_table() {
        assert_eq!(http_status_to_code(400), Code::Internal);
        assert_eq!(http_status_to_code(401), Code::Unauthenticated);
        assert_eq!(http_status_to_code(403), Code::PermissionDenied);
        assert_eq!(http_status_to_code(404), Code::Unimplemented);
        assert_eq!(http_status_to_code(429), Code::Unavailable);
        assert_eq!(http_status_to_code(502), Code::Unavailable);
        assert_eq!(http_status_to_code(503), Code::Unavailable);
        assert_eq!(http_status_to_code(504), Code::Unavailable);
        assert_eq!(http_status_to_code(418), Code::Unknown);
    }

    #[test]
    fn rst_stream_mapping_matches_table() {
        assert_eq!(
            rst_stream_to_status(RstStreamReason::from_h2_code(0x7)).code,
            Code::Unavailable
        );
        assert_eq!(
            rst_stream_to_status(RstStreamReason::from_h2_code(0x8)).code,
            Code::Cancelled
        );
        assert_eq!(
            rst_stream_to_status(RstStreamReason::from_h2_code(0xb)).code,
            Code::ResourceExhausted
        );
        assert_eq!(
            rst_stream_to_status(RstStreamReason::from_h2_code(0xc)).code,
            Code::PermissionDenied
        );
        assert_eq!(
            rst_stream_to_status(RstStreamReason::from_h2_code(0x2)).code,
            Code::Internal
        );
    }

    #[test]
    fn status_display_includes_code_and_details() {
        let s = Status::new(Code::NotFound, "no such user");
        assert_eq!(format!("{s}"), "NOT_FOUND: no such user");
    }
}
