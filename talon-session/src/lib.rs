//! Call state machines: `Http2CallStream` on the client side,
//! `Http2ServerCall` on the server side. Both drive a transport-agnostic
//! stream (see [`transport`]) through the filter chain and enforce the
//! same shape of invariant — metadata, then messages, then exactly one
//! terminal status.

pub mod client;
pub mod server;
pub mod state;
pub mod transport;

pub use client::{CallHandle, ClientCallListener, Http2CallStream};
pub use server::{Http2ServerCall, MethodType, ServerCallContext, ServerCallHandler};
pub use state::CallState;
