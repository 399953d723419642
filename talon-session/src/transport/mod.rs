//! The HTTP/2 transport boundary: the minimal set of operations a call
//! state machine needs from a stream, independent of whatever actually
//! backs it (a real `h2` connection, or an in-memory duplex for tests).
//!
//! Client and server see different shapes here on purpose, mirroring `h2`
//! itself: a client stream is opened with a full `http::Request` (method,
//! `:path`, `:authority` and regular headers all travel together, the way
//! `h2::client::SendRequest::send_request` takes them); a server stream's
//! request headers arrive out of band, at accept time, so from the
//! [`ServerStream`] trait's perspective there is only a response to send.
//! Neither trait routes pseudo-headers (`:method`, `:path`, `:status`, ...)
//! through a [`Metadata`](talon_wire::Metadata)/`HeaderMap` — `http::HeaderMap`
//! cannot hold a `:`-prefixed name, so pseudo-headers are carried on
//! `http::Request`/an explicit `status: u16` instead.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request};
use thiserror::Error;

use talon_wire::RstStreamReason;

#[cfg(any(test, feature = "test-util"))]
pub mod tests_support;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream reset by peer: {0:?}")]
    Reset(RstStreamReason),
    #[error("transport closed")]
    Closed,
    #[error("transport error: {0}")]
    Other(String),
}

/// One inbound event on a stream's receive side, delivered in wire order.
#[derive(Debug)]
pub enum Http2Event {
    /// The peer's response headers (client side only): the HTTP `:status`
    /// pseudo-header plus regular headers. Exactly one per stream, and
    /// always the first event.
    Headers { status: u16, metadata: HeaderMap },
    /// One complete DATA chunk. Chunk boundaries carry no meaning; message
    /// framing is a layer above this trait (`talon_codec::StreamDecoder`).
    Data(Bytes),
    /// Trailing headers, carrying `grpc-status` and friends.
    Trailers(HeaderMap),
    /// The stream ended cleanly with no trailers (e.g. a headers-only
    /// response, or a transport that doesn't distinguish trailers from
    /// stream end). The caller falls back to the HTTP-status mapping.
    End,
}

/// The client side of one HTTP/2 stream, from the call state machine's
/// perspective.
#[async_trait]
pub trait ClientStream: Send {
    /// Opens the stream by sending request headers (and, if `end_stream`,
    /// closing the send side immediately — used for a call with no request
    /// body at all, which does not occur in practice here since every gRPC
    /// request carries at least a length-prefixed frame, but is supported
    /// for completeness).
    async fn start(&mut self, request: Request<()>, end_stream: bool) -> Result<(), TransportError>;

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), TransportError>;

    /// Pulls the next event. Implementations must deliver `Headers` exactly
    /// once, before anything else, and must eventually yield `Trailers` or
    /// `End` (never both) as the last event.
    async fn recv_event(&mut self) -> Result<Http2Event, TransportError>;

    fn reset(&mut self, reason: RstStreamReason);
}

/// The server side of one HTTP/2 stream. Request headers arrive out of
/// band, already parsed by the listener into dispatch info and metadata;
/// from here it is response headers, then data, then trailers.
#[async_trait]
pub trait ServerStream: Send {
    async fn send_response_headers(
        &mut self,
        status: u16,
        metadata: HeaderMap,
    ) -> Result<(), TransportError>;

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), TransportError>;

    async fn send_trailers(&mut self, trailers: HeaderMap) -> Result<(), TransportError>;

    /// Returns `None` at end of the inbound DATA portion; a stream reset by
    /// the peer surfaces as `Err`.
    async fn recv_data(&mut self) -> Result<Option<Bytes>, TransportError>;

    fn reset(&mut self, reason: RstStreamReason);
}
