//! The server call state machine: header parse (done by the caller, which
//! owns the listener and the method registry) feeds straight into deadline
//! arm, handler lookup, dispatch, and exactly one trailers frame.
//!
//! Unlike the client side there is no pick-queueing state: a server call is
//! either dispatched to a known handler or immediately failed
//! `UNIMPLEMENTED`, so the state machine here is flatter — attach, drive,
//! end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use talon_codec::StreamDecoder;
use talon_filters::{reclassify_receive_error, reclassify_send_error, FilterChain, FilterOutcome};
use talon_wire::{Code, Metadata, RstStreamReason, Status};

use crate::transport::{ServerStream, TransportError};

/// Streaming shape of a method, as recorded at registration time. The
/// driving loop here treats all four shapes identically — it just pumps
/// whatever messages arrive to the handler and whatever messages the
/// handler produces back to the wire — but handlers and registries use this
/// to validate call patterns and for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

/// Per-call context handed to a handler: the request metadata (after the
/// receive filter chain has run) and a side channel for attaching trailing
/// metadata independent of the call's outcome.
pub struct ServerCallContext {
    pub method_path: String,
    pub request_metadata: Metadata,
    pub deadline: Option<Duration>,
    trailing_metadata: Arc<Mutex<Metadata>>,
}

impl ServerCallContext {
    /// Records metadata to attach to the final trailers. If the handler also
    /// returns an `Err(Status)` whose own `metadata` is non-empty, that
    /// status's metadata takes precedence over whatever was set here.
    pub fn set_trailing_metadata(&self, metadata: Metadata) {
        *self.trailing_metadata.lock() = metadata;
    }
}

/// A registered method implementation. `handle` is driven with an inbound
/// channel of already-deframed, filter-passed request messages and an
/// outbound channel for response messages; the framework takes care of
/// framing, filtering, and header/trailer timing around it.
#[async_trait]
pub trait ServerCallHandler: Send + Sync {
    fn method_type(&self) -> MethodType;

    async fn handle(
        &self,
        context: ServerCallContext,
        inbound: mpsc::Receiver<Bytes>,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<Metadata, Status>;
}

/// The outcome of a completed server call's header parse + handler lookup,
/// fed to [`Http2ServerCall::run`].
pub struct Http2ServerCall {
    method_path: String,
    request_metadata: Metadata,
    deadline: Option<Duration>,
    handler: Option<Arc<dyn ServerCallHandler>>,
    filter_chain: FilterChain,
}

impl Http2ServerCall {
    pub fn new(
        method_path: impl Into<String>,
        request_metadata: Metadata,
        deadline: Option<Duration>,
        handler: Option<Arc<dyn ServerCallHandler>>,
        filter_chain: FilterChain,
    ) -> Self {
        Http2ServerCall {
            method_path: method_path.into(),
            request_metadata,
            deadline,
            handler,
            filter_chain,
        }
    }

    /// Drives the call to completion: deadline timer, handler dispatch,
    /// inbound/outbound pumping, and exactly one trailers frame. Consumes
    /// the stream; the caller (the listener accept loop) should spawn this.
    pub async fn run(self, mut stream: Box<dyn ServerStream>) {
        let Http2ServerCall {
            method_path,
            request_metadata,
            deadline,
            handler,
            filter_chain,
        } = self;

        let handler = match handler {
            Some(handler) => handler,
            None => {
                finish_without_response_body(
                    &mut *stream,
                    Status::new(Code::Unimplemented, format!("unknown method {method_path}")),
                )
                .await;
                return;
            }
        };

        let metadata = match filter_chain.receive_metadata(request_metadata).await {
            FilterOutcome::Continue(metadata) => metadata,
            FilterOutcome::Fail(status) => {
                finish_without_response_body(&mut *stream, reclassify_receive_error(status)).await;
                return;
            }
        };

        let trailing_metadata = Arc::new(Mutex::new(Metadata::new()));
        let context = ServerCallContext {
            method_path,
            request_metadata: metadata,
            deadline,
            trailing_metadata: trailing_metadata.clone(),
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(4);
        let (final_tx, mut final_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = handler.handle(context, inbound_rx, outbound_tx).await;
            let _ = final_tx.send(result);
        });

        let mut decoder = StreamDecoder::new();
        let mut inbound_tx = Some(inbound_tx);
        let mut headers_sent = false;
        let mut status_emitted = false;
        let mut outbound_done = false;
        let mut final_result: Option<Result<Metadata, Status>> = None;

        let mut deadline_sleep: Option<std::pin::Pin<Box<tokio::time::Sleep>>> =
            deadline.map(|duration| Box::pin(tokio::time::sleep(duration)));

        loop {
            if status_emitted {
                break;
            }

            tokio::select! {
                biased;

                _ = async { deadline_sleep.as_mut().unwrap().as_mut().await }, if deadline_sleep.is_some() && !status_emitted => {
                    stream.reset(RstStreamReason::Cancel);
                    finish_call(
                        &mut *stream,
                        &mut headers_sent,
                        &mut status_emitted,
                        Status::new(Code::DeadlineExceeded, "deadline exceeded"),
                    ).await;
                    break;
                }

                data_result = stream.recv_data(), if inbound_tx.is_some() && !status_emitted => {
                    match data_result {
                        Ok(Some(chunk)) => {
                            for decoded in decoder.push(&chunk) {
                                match filter_chain.receive_message(decoded.payload).await {
                                    FilterOutcome::Continue(message) => {
                                        if let Some(tx) = &inbound_tx {
                                            let _ = tx.send(message).await;
                                        }
                                    }
                                    FilterOutcome::Fail(status) => {
                                        inbound_tx = None;
                                        finish_call(
                                            &mut *stream,
                                            &mut headers_sent,
                                            &mut status_emitted,
                                            reclassify_receive_error(status),
                                        ).await;
                                        break;
                                    }
                                }
                            }
                        }
                        Ok(None) => {
                            inbound_tx = None;
                        }
                        Err(TransportError::Reset(reason)) => {
                            inbound_tx = None;
                            finish_call(
                                &mut *stream,
                                &mut headers_sent,
                                &mut status_emitted,
                                talon_wire::rst_stream_to_status(reason),
                            ).await;
                            break;
                        }
                        Err(err) => {
                            inbound_tx = None;
                            finish_call(
                                &mut *stream,
                                &mut headers_sent,
                                &mut status_emitted,
                                transport_error_to_status(err),
                            ).await;
                            break;
                        }
                    }
                }

                outbound_item = outbound_rx.recv(), if !outbound_done && !status_emitted => {
                    match outbound_item {
                        Some(message) => {
                            match filter_chain.send_message(message).await {
                                FilterOutcome::Continue(framed) => {
                                    if !headers_sent {
                                        if let Err(err) = stream.send_response_headers(200, HeaderMap::new()).await {
                                            finish_call(
                                                &mut *stream,
                                                &mut headers_sent,
                                                &mut status_emitted,
                                                transport_error_to_status(err),
                                            ).await;
                                            break;
                                        }
                                        headers_sent = true;
                                    }
                                    let frame = talon_wire::frame::encode_frame(&framed);
                                    if let Err(err) = stream.send_data(frame, false).await {
                                        finish_call(
                                            &mut *stream,
                                            &mut headers_sent,
                                            &mut status_emitted,
                                            transport_error_to_status(err),
                                        ).await;
                                        break;
                                    }
                                }
                                FilterOutcome::Fail(status) => {
                                    finish_call(
                                        &mut *stream,
                                        &mut headers_sent,
                                        &mut status_emitted,
                                        reclassify_send_error(status),
                                    ).await;
                                    break;
                                }
                            }
                        }
                        None => {
                            outbound_done = true;
                            if let Some(result) = final_result.take() {
                                let status = finalize_status(result, &trailing_metadata);
                                finish_call(&mut *stream, &mut headers_sent, &mut status_emitted, status).await;
                                break;
                            }
                        }
                    }
                }

                result = &mut final_rx, if final_result.is_none() && !status_emitted => {
                    if let Ok(result) = result {
                        if outbound_done {
                            let status = finalize_status(result, &trailing_metadata);
                            finish_call(&mut *stream, &mut headers_sent, &mut status_emitted, status).await;
                            break;
                        }
                        final_result = Some(result);
                    }
                }
            }
        }
    }
}

fn finalize_status(result: Result<Metadata, Status>, trailing_metadata: &Mutex<Metadata>) -> Status {
    let side_channel = trailing_metadata.lock().clone();
    match result {
        Ok(returned_metadata) => {
            let mut merged = side_channel;
            merged.merge(&returned_metadata);
            Status::ok().with_metadata(merged)
        }
        Err(status) if status.metadata.is_empty() => status.with_metadata(side_channel),
        Err(status) => status,
    }
}

async fn finish_call(
    stream: &mut dyn ServerStream,
    headers_sent: &mut bool,
    status_emitted: &mut bool,
    status: Status,
) {
    if *status_emitted {
        return;
    }
    *status_emitted = true;
    if !*headers_sent {
        let _ = stream.send_response_headers(200, HeaderMap::new()).await;
        *headers_sent = true;
    }
    let trailers = talon_wire::build_trailers(&status);
    let _ = stream.send_trailers(trailers).await;
}

/// Used for the deadline/unimplemented/pre-handler paths where there is no
/// response body at all.
async fn finish_without_response_body(stream: &mut dyn ServerStream, status: Status) {
    let _ = stream.send_response_headers(200, HeaderMap::new()).await;
    let trailers = talon_wire::build_trailers(&status);
    let _ = stream.send_trailers(trailers).await;
}

fn transport_error_to_status(error: TransportError) -> Status {
    match error {
        TransportError::Reset(reason) => talon_wire::rst_stream_to_status(reason),
        TransportError::Closed => Status::new(Code::Unavailable, "Connection dropped"),
        TransportError::Other(message) => Status::new(Code::Unavailable, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests_support::InMemoryClientStream;

    struct Echo;

    #[async_trait]
    impl ServerCallHandler for Echo {
        fn method_type(&self) -> MethodType {
            MethodType::Unary
        }

        async fn handle(
            &self,
            _context: ServerCallContext,
            mut inbound: mpsc::Receiver<Bytes>,
            outbound: mpsc::Sender<Bytes>,
        ) -> Result<Metadata, Status> {
            if let Some(message) = inbound.recv().await {
                let _ = outbound.send(message).await;
            }
            Ok(Metadata::new())
        }
    }

    struct Failing;

    #[async_trait]
    impl ServerCallHandler for Failing {
        fn method_type(&self) -> MethodType {
            MethodType::Unary
        }

        async fn handle(
            &self,
            _context: ServerCallContext,
            _inbound: mpsc::Receiver<Bytes>,
            _outbound: mpsc::Sender<Bytes>,
        ) -> Result<Metadata, Status> {
            Err(Status::new(Code::FailedPrecondition, "nope"))
        }
    }

    #[tokio::test]
    async fn echo_handler_sends_message_then_ok_status() {
        let (mut client, server) = InMemoryClientStream::pair();
        let call = Http2ServerCall::new(
            "/echo.Echoer/Say",
            Metadata::new(),
            None,
            Some(Arc::new(Echo)),
            FilterChain::empty(),
        );
        tokio::spawn(call.run(Box::new(server)));

        let request = http::Request::builder().uri("/echo.Echoer/Say").body(()).unwrap();
        client.start(request, false).await.unwrap();
        let frame = talon_wire::frame::encode_frame(b"hi");
        client.send_data(frame, true).await.unwrap();

        let events = collect_events(&mut client).await;
        assert!(events.iter().any(|e| e == "data:hi"));
        assert!(events.last().unwrap().starts_with("trailers:OK"));
    }

    #[tokio::test]
    async fn missing_handler_returns_unimplemented() {
        let (mut client, server) = InMemoryClientStream::pair();
        let call = Http2ServerCall::new(
            "/echo.Echoer/Missing",
            Metadata::new(),
            None,
            None,
            FilterChain::empty(),
        );
        tokio::spawn(call.run(Box::new(server)));

        let request = http::Request::builder().uri("/echo.Echoer/Missing").body(()).unwrap();
        client.start(request, true).await.unwrap();

        let events = collect_events(&mut client).await;
        assert!(events.last().unwrap().starts_with("trailers:UNIMPLEMENTED"));
    }

    #[tokio::test]
    async fn handler_error_becomes_trailers_status() {
        let (mut client, server) = InMemoryClientStream::pair();
        let call = Http2ServerCall::new(
            "/echo.Echoer/Fail",
            Metadata::new(),
            None,
            Some(Arc::new(Failing)),
            FilterChain::empty(),
        );
        tokio::spawn(call.run(Box::new(server)));

        let request = http::Request::builder().uri("/echo.Echoer/Fail").body(()).unwrap();
        client.start(request, true).await.unwrap();

        let events = collect_events(&mut client).await;
        assert!(events.last().unwrap().starts_with("trailers:FAILED_PRECONDITION"));
    }

    async fn collect_events(client: &mut InMemoryClientStream) -> Vec<String> {
        let mut decoder = StreamDecoder::new();
        let mut events = Vec::new();
        loop {
            match client.recv_event().await {
                Ok(crate::transport::Http2Event::Headers { .. }) => {}
                Ok(crate::transport::Http2Event::Data(chunk)) => {
                    for decoded in decoder.push(&chunk) {
                        events.push(format!("data:{}", String::from_utf8_lossy(&decoded.payload)));
                    }
                }
                Ok(crate::transport::Http2Event::Trailers(raw)) => {
                    let (status, _errors) = talon_wire::parse_status_from_trailers(&raw)
                        .unwrap_or((Status::new(Code::Unknown, "missing"), Vec::new()));
                    events.push(format!("trailers:{}", status.code));
                    break;
                }
                Ok(crate::transport::Http2Event::End) => break,
                Err(_) => break,
            }
        }
        events
    }
}
