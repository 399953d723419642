//! Trailer layout: `grpc-status`, optional `grpc-message` (URI-encoded), plus
//! user trailing metadata.

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::metadata::{Metadata, MetadataError};
use crate::status::{Code, Status};

const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";

/// Builds the trailer `HeaderMap` sent by a server (or, for headers-only
/// responses, by a client wrapping up an all-in-one failure) at the end of a
/// call: `grpc-status`, an optional URI-encoded `grpc-message`, and any user
/// trailing metadata.
pub fn build_trailers(status: &Status) -> HeaderMap {
    let mut map = status.metadata.to_wire_headers();

    map.insert(
        HeaderName::from_static(GRPC_STATUS),
        HeaderValue::from_str(&status.code.as_i32().to_string()).unwrap(),
    );

    if !status.details.is_empty() {
        let encoded = percent_encode(&status.details);
        if let Ok(value) = HeaderValue::from_str(&encoded) {
            map.insert(HeaderName::from_static(GRPC_MESSAGE), value);
        }
    }

    map
}

/// Parses trailers into a `Status`, if a `grpc-status` entry is present.
/// Returns `None` when the trailers carry no status at all (the caller
/// should then fall back to the HTTP `:status` or RST_STREAM mapping).
pub fn parse_status_from_trailers(trailers: &HeaderMap) -> Option<(Status, Vec<MetadataError>)> {
    let raw_code = trailers.get(GRPC_STATUS)?;
    let code = raw_code
        .to_str()
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
        .map(Code::from_i32)
        .unwrap_or(Code::Unknown);

    let details = trailers
        .get(GRPC_MESSAGE)
        .and_then(|v| v.to_str().ok())
        .map(percent_decode)
        .unwrap_or_default();

    let mut user_trailers = trailers.clone();
    user_trailers.remove(GRPC_STATUS);
    user_trailers.remove(GRPC_MESSAGE);
    let (metadata, errors) = Metadata::from_wire_headers(&user_trailers);

    Some((Status::new(code, details).with_metadata(metadata), errors))
}

/// Minimal percent-encoding sufficient for `grpc-message`: any byte outside
/// printable-ASCII-minus-`%` is escaped. This matches what gRPC
/// implementations do for the details string so it can live in a header
/// value without violating HTTP's value syntax.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~' | b' ') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
