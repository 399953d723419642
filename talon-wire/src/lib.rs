//! Spec-level wire types: the `Status`/`Code` enumeration, the `Metadata`
//! container, deadline encoding, the length-prefixed message frame, and
//! trailer layout. Everything here is pure data and pure functions — no
//! sockets, no async.

pub mod deadline;
pub mod frame;
pub mod metadata;
pub mod service_config;
pub mod status;
pub mod trailers;

pub use deadline::Deadline;
pub use metadata::{Metadata, MetadataError, MetadataValue};
pub use service_config::{MethodConfig, MethodName, ServiceConfig, ServiceConfigError};
pub use status::{http_status_to_code, rst_stream_to_status, Code, RstStreamReason, Status};
pub use trailers::{build_trailers, parse_status_from_trailers};
