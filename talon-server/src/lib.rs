//! The server half of the runtime: a method registry, a real `h2`-backed
//! listener, and the glue between the two. Call dispatch itself — deadline
//! arm, handler invocation, framing, trailers — lives in
//! `talon_session::server::Http2ServerCall`; this crate only supplies the
//! transport (`H2ServerStream`) and the accept loop around it.

mod registry;
mod server;
mod transport;

pub use registry::MethodRegistry;
pub use server::Server;

pub use talon_session::server::{MethodType, ServerCallContext, ServerCallHandler};
