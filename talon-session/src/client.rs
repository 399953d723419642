//! The client call state machine: `NOT_STARTED -> PICK_PENDING -> ATTACHED
//! -> HALF_CLOSED_LOCAL/REMOTE -> ENDED`.
//!
//! Pick-queueing itself (the `PICK_PENDING` waiting-on-a-picker state) is
//! owned by `talon-channel`, which re-picks queued calls and only then hands
//! this type a live `ClientStream` to attach to. From here down, the state
//! machine is just: send initial metadata, stream messages in both
//! directions, deliver exactly one status.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderValue, Request};
use tokio::sync::{mpsc, watch};

use talon_codec::StreamDecoder;
use talon_filters::{reclassify_receive_error, reclassify_send_error, FilterChain, FilterOutcome};
use talon_wire::{Code, Metadata, RstStreamReason, Status};

use crate::state::CallState;
use crate::transport::{ClientStream, Http2Event, TransportError};

/// Delivered events for one call. All three callbacks run on the task
/// driving the call; implementations must not block.
pub trait ClientCallListener: Send + Sync {
    fn on_receive_metadata(&self, metadata: Metadata);
    fn on_receive_message(&self, message: Bytes);
    fn on_receive_status(&self, status: Status);
}

enum OutgoingOp {
    Message(Bytes),
    CloseSend,
}

/// A live handle to a call already attached to a transport. Cloning is
/// cheap; every clone can send messages or cancel.
#[derive(Clone)]
pub struct CallHandle {
    outgoing: mpsc::Sender<OutgoingOp>,
    cancel: watch::Sender<Option<Status>>,
}

impl CallHandle {
    /// Enforces the single-pending-buffer rule: this resolves only once the
    /// previous message has been taken off the internal queue, so a second
    /// concurrent `send_message` call genuinely waits rather than buffering
    /// unboundedly.
    pub async fn send_message(&self, message: Bytes) -> Result<(), Status> {
        self.outgoing
            .send(OutgoingOp::Message(message))
            .await
            .map_err(|_| Status::new(Code::Internal, "call already ended"))
    }

    pub async fn close_send(&self) -> Result<(), Status> {
        self.outgoing
            .send(OutgoingOp::CloseSend)
            .await
            .map_err(|_| Status::new(Code::Internal, "call already ended"))
    }

    /// Idempotent: once a cancellation (or any other end status) has been
    /// recorded, later calls are no-ops.
    pub fn cancel_with_status(&self, status: Status) {
        let _ = self.cancel.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(status.clone());
                true
            } else {
                false
            }
        });
    }

    /// Builds a handle for a call that never reaches a transport at all —
    /// the DROP pick outcome, or any other pre-attach failure. The
    /// listener's terminal status fires immediately; further
    /// `send_message`/`close_send`/`cancel_with_status` calls are silently
    /// absorbed, same as a handle whose call has already ended. Owned by
    /// the pick-queueing layer (`talon-channel`), since this state machine
    /// itself never sees a call before it is attached to a stream.
    pub fn failed(status: Status, listener: Arc<dyn ClientCallListener>) -> Self {
        let (outgoing, mut rx) = mpsc::channel(1);
        let (cancel, _cancel_rx) = watch::channel(None);
        tokio::spawn(async move {
            listener.on_receive_status(status);
            while rx.recv().await.is_some() {}
        });
        CallHandle { outgoing, cancel }
    }
}

pub struct Http2CallStream {
    method_path: String,
    deadline: Option<Duration>,
    filter_chain: FilterChain,
    listener: Arc<dyn ClientCallListener>,
}

impl Http2CallStream {
    pub fn new(
        method_path: impl Into<String>,
        deadline: Option<Duration>,
        listener: Arc<dyn ClientCallListener>,
        filter_chain: FilterChain,
    ) -> Self {
        Http2CallStream {
            method_path: method_path.into(),
            deadline,
            filter_chain,
            listener,
        }
    }

    /// Attaches this call to a live transport stream and spawns the task
    /// that drives it to completion. Returns a handle for sending messages
    /// and cancelling; terminal status always arrives through the listener,
    /// never through this handle's return value.
    pub fn spawn(
        self,
        stream: Box<dyn ClientStream>,
        metadata: Metadata,
        authority: Option<String>,
        user_agent: &str,
    ) -> CallHandle {
        let (tx, rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(None);
        let request = self.build_request(metadata, authority.as_deref(), user_agent);

        tokio::spawn(Self::drive(
            self.filter_chain,
            self.listener,
            stream,
            request,
            rx,
            cancel_rx,
        ));

        CallHandle {
            outgoing: tx,
            cancel: cancel_tx,
        }
    }

    fn build_request(
        &self,
        mut metadata: Metadata,
        authority: Option<&str>,
        user_agent: &str,
    ) -> Request<()> {
        enforce_single_authorization(&mut metadata);
        if let Some(deadline) = self.deadline {
            let _ = metadata.set(
                "grpc-timeout",
                talon_wire::MetadataValue::Ascii(talon_wire::deadline::encode_timeout(deadline)),
            );
        }

        let mut builder = Request::builder()
            .method("POST")
            .uri(self.method_path.clone())
            .header("te", HeaderValue::from_static("trailers"))
            .header(
                "content-type",
                HeaderValue::from_static("application/grpc+proto"),
            )
            .header("grpc-encoding", HeaderValue::from_static("identity"));
        if let Some(authority) = authority {
            builder = builder.header("host", authority);
        }
        if let Ok(value) = HeaderValue::from_str(user_agent) {
            builder = builder.header("user-agent", value);
        }

        let mut request = builder.body(()).unwrap_or_else(|_| {
            Request::builder()
                .method("POST")
                .uri("/")
                .body(())
                .expect("static fallback request is always valid")
        });

        let wire_headers = metadata.to_wire_headers();
        let headers = request.headers_mut();
        for (name, value) in wire_headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        request
    }

    async fn drive(
        filter_chain: FilterChain,
        listener: Arc<dyn ClientCallListener>,
        mut stream: Box<dyn ClientStream>,
        request: Request<()>,
        mut outgoing: mpsc::Receiver<OutgoingOp>,
        mut cancel_rx: watch::Receiver<Option<Status>>,
    ) {
        let mut state = CallState::Attached;
        let mut status_emitted = false;
        let mut metadata_delivered = false;
        let mut decoder = StreamDecoder::new();
        let mut send_closed = false;

        if let Err(err) = stream.start(request, false).await {
            emit_status(
                &listener,
                &mut status_emitted,
                transport_error_to_status(err),
            );
            return;
        }

        loop {
            if status_emitted {
                break;
            }

            tokio::select! {
                biased;

                changed = cancel_rx.changed(), if !status_emitted => {
                    if changed.is_ok() {
                        if let Some(status) = cancel_rx.borrow().clone() {
                            stream.reset(RstStreamReason::Cancel);
                            emit_status(&listener, &mut status_emitted, status);
                            break;
                        }
                    }
                }

                op = outgoing.recv(), if !send_closed && !status_emitted => {
                    match op {
                        Some(OutgoingOp::Message(message)) => {
                            match filter_chain.send_message(message).await {
                                FilterOutcome::Continue(framed) => {
                                    let frame = talon_wire::frame::encode_frame(&framed);
                                    if let Err(err) = stream.send_data(frame, false).await {
                                        emit_status(&listener, &mut status_emitted, transport_error_to_status(err));
                                        break;
                                    }
                                }
                                FilterOutcome::Fail(status) => {
                                    let status = reclassify_send_error(status);
                                    stream.reset(RstStreamReason::Cancel);
                                    emit_status(&listener, &mut status_emitted, status);
                                    break;
                                }
                            }
                        }
                        Some(OutgoingOp::CloseSend) | None => {
                            send_closed = true;
                            state = CallState::HalfClosedLocal;
                            if let Err(err) = stream.send_data(Bytes::new(), true).await {
                                emit_status(&listener, &mut status_emitted, transport_error_to_status(err));
                                break;
                            }
                        }
                    }
                }

                event = stream.recv_event(), if !status_emitted => {
                    match event {
                        Ok(Http2Event::Headers { status: http_status, metadata: raw }) => {
                            let (parsed, _errors) = Metadata::from_wire_headers(&raw);
                            match filter_chain.receive_metadata(parsed).await {
                                FilterOutcome::Continue(metadata) => {
                                    metadata_delivered = true;
                                    listener.on_receive_metadata(metadata);
                                    if !(200..300).contains(&http_status) {
                                        let status = talon_wire::http_status_to_code(http_status);
                                        emit_status(&listener, &mut status_emitted, Status::new(status, "non-2xx response status"));
                                        break;
                                    }
                                }
                                FilterOutcome::Fail(status) => {
                                    let status = reclassify_receive_error(status);
                                    emit_status(&listener, &mut status_emitted, status);
                                    break;
                                }
                            }
                        }
                        Ok(Http2Event::Data(chunk)) => {
                            for decoded in decoder.push(&chunk) {
                                match filter_chain.receive_message(decoded.payload).await {
                                    FilterOutcome::Continue(message) => {
                                        listener.on_receive_message(message);
                                    }
                                    FilterOutcome::Fail(status) => {
                                        let status = reclassify_receive_error(status);
                                        emit_status(&listener, &mut status_emitted, status);
                                        break;
                                    }
                                }
                            }
                        }
                        Ok(Http2Event::Trailers(raw)) => {
                            let status = talon_wire::parse_status_from_trailers(&raw)
                                .map(|(status, _errors)| status)
                                .unwrap_or_else(|| Status::new(Code::Unknown, "no grpc-status in trailers"));
                            match filter_chain.receive_trailers(status).await {
                                FilterOutcome::Continue(status) => {
                                    emit_status(&listener, &mut status_emitted, status);
                                }
                                FilterOutcome::Fail(status) => {
                                    emit_status(&listener, &mut status_emitted, reclassify_receive_error(status));
                                }
                            }
                            break;
                        }
                        Ok(Http2Event::End) => {
                            state = if state == CallState::HalfClosedLocal {
                                CallState::Ended
                            } else {
                                CallState::HalfClosedRemote
                            };
                            emit_status(
                                &listener,
                                &mut status_emitted,
                                Status::new(Code::Unknown, "stream ended without trailers"),
                            );
                            break;
                        }
                        Err(TransportError::Reset(reason)) => {
                            emit_status(&listener, &mut status_emitted, talon_wire::rst_stream_to_status(reason));
                            break;
                        }
                        Err(err) => {
                            emit_status(&listener, &mut status_emitted, transport_error_to_status(err));
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn enforce_single_authorization(metadata: &mut Metadata) {
    if let Some(last) = metadata.get("authorization").last().cloned() {
        let _ = metadata.set("authorization", last);
    }
}

fn transport_error_to_status(error: TransportError) -> Status {
    match error {
        TransportError::Reset(reason) => talon_wire::rst_stream_to_status(reason),
        TransportError::Closed => Status::new(Code::Unavailable, "Connection dropped"),
        TransportError::Other(message) => Status::new(Code::Unavailable, message),
    }
}

/// Status is delivered exactly once: every call site in `drive` routes
/// through here, and after the first delivery this is a no-op, which is
/// what backs invariant 3 (at-most-one final status) and invariant 5
/// (cancellation idempotence).
fn emit_status(listener: &Arc<dyn ClientCallListener>, status_emitted: &mut bool, status: Status) {
    if *status_emitted {
        return;
    }
    *status_emitted = true;
    listener.on_receive_status(status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests_support::InMemoryClientStream;
    use http::HeaderMap;
    use std::sync::Mutex;
    use talon_filters::FilterStack;

    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn new() -> Self {
            RecordingListener {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    impl ClientCallListener for RecordingListener {
        fn on_receive_metadata(&self, _metadata: Metadata) {
            self.events.lock().unwrap().push("metadata".into());
        }

        fn on_receive_message(&self, message: Bytes) {
            self.events
                .lock()
                .unwrap()
                .push(format!("message:{}", String::from_utf8_lossy(&message)));
        }

        fn on_receive_status(&self, status: Status) {
            self.events
                .lock()
                .unwrap()
                .push(format!("status:{}", status.code));
        }
    }

    #[tokio::test]
    async fn metadata_precedes_message_precedes_status() {
        let (client_side, mut server_side) = InMemoryClientStream::pair();
        let listener = Arc::new(RecordingListener::new());
        let call = Http2CallStream::new(
            "/echo.Echoer/Say",
            None,
            listener.clone(),
            FilterStack::new().instantiate(),
        );
        let handle = call.spawn(Box::new(client_side), Metadata::new(), None, "talon/test");

        let server_task = tokio::spawn(async move {
            let _request = server_side.accept().await.unwrap();
            server_side
                .send_response_headers(200, HeaderMap::new())
                .await
                .unwrap();
            let frame = talon_wire::frame::encode_frame(b"hello");
            server_side.send_data(frame, false).await.unwrap();
            let trailers = talon_wire::build_trailers(&Status::ok());
            server_side.send_trailers(trailers).await.unwrap();
        });

        handle.close_send().await.unwrap();
        server_task.await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let events = listener.events.lock().unwrap().clone();
        assert_eq!(events[0], "metadata");
        assert_eq!(events[1], "message:hello");
        assert_eq!(events[2], "status:OK");
    }

    #[tokio::test]
    async fn cancel_after_end_is_a_no_op() {
        let (client_side, server_side) = InMemoryClientStream::pair();
        drop(server_side);
        let listener = Arc::new(RecordingListener::new());
        let call = Http2CallStream::new(
            "/echo.Echoer/Say",
            None,
            listener.clone(),
            FilterStack::new().instantiate(),
        );
        let handle = call.spawn(Box::new(client_side), Metadata::new(), None, "talon/test");
        handle.cancel_with_status(Status::new(Code::Cancelled, "stop"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.cancel_with_status(Status::new(Code::Internal, "ignored"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let events = listener.events.lock().unwrap().clone();
        let status_events: Vec<_> = events.iter().filter(|e| e.starts_with("status")).collect();
        assert_eq!(status_events.len(), 1);
        assert_eq!(status_events[0], "status:CANCELLED");
    }
}
