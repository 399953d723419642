//! An in-memory duplex pair implementing [`ClientStream`]/[`ServerStream`],
//! grounded in the teacher's `MemTransport` (`rapace-core/src/transport/mem.rs`):
//! two `mpsc` channels, one per direction, wrapped so each side sees the
//! narrower trait it actually needs.

use bytes::Bytes;
use http::{HeaderMap, Request};
use tokio::sync::mpsc;

use talon_wire::RstStreamReason;

use super::{ClientStream, Http2Event, ServerStream, TransportError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum ClientToServer {
    Request(Request<()>, bool),
    Data(Bytes, bool),
    Reset(RstStreamReason),
}

#[derive(Debug)]
enum ServerToClient {
    Headers(u16, HeaderMap),
    Data(Bytes, bool),
    Trailers(HeaderMap),
    Reset(RstStreamReason),
}

/// The client-facing half of an in-memory stream pair.
pub struct InMemoryClientStream {
    tx: mpsc::Sender<ClientToServer>,
    rx: mpsc::Receiver<ServerToClient>,
    headers_delivered: bool,
    data_ended: bool,
}

/// The server-facing half of an in-memory stream pair.
pub struct InMemoryServerStream {
    tx: mpsc::Sender<ServerToClient>,
    rx: mpsc::Receiver<ClientToServer>,
    data_ended: bool,
}

/// What the server side observes once the client opens the stream: the
/// request itself, plus whatever the client decided about `end_stream` for
/// that initial call.
pub struct ReceivedRequest {
    pub request: Request<()>,
    pub end_stream: bool,
}

impl InMemoryClientStream {
    /// Builds a connected pair. The server side must first await
    /// [`InMemoryServerStream::accept`] to see the client's opening request.
    pub fn pair() -> (InMemoryClientStream, InMemoryServerStream) {
        let (c2s_tx, c2s_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (s2c_tx, s2c_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            InMemoryClientStream {
                tx: c2s_tx,
                rx: s2c_rx,
                headers_delivered: false,
                data_ended: false,
            },
            InMemoryServerStream {
                tx: s2c_tx,
                rx: c2s_rx,
                data_ended: false,
            },
        )
    }
}

#[async_trait::async_trait]
impl ClientStream for InMemoryClientStream {
    async fn start(&mut self, request: Request<()>, end_stream: bool) -> Result<(), TransportError> {
        self.tx
            .send(ClientToServer::Request(request, end_stream))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), TransportError> {
        self.tx
            .send(ClientToServer::Data(data, end_stream))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_event(&mut self) -> Result<Http2Event, TransportError> {
        if self.data_ended {
            return Err(TransportError::Closed);
        }
        match self.rx.recv().await {
            Some(ServerToClient::Headers(status, metadata)) => {
                self.headers_delivered = true;
                Ok(Http2Event::Headers { status, metadata })
            }
            Some(ServerToClient::Data(data, end_stream)) => {
                if end_stream {
                    self.data_ended = true;
                }
                Ok(Http2Event::Data(data))
            }
            Some(ServerToClient::Trailers(trailers)) => {
                self.data_ended = true;
                Ok(Http2Event::Trailers(trailers))
            }
            Some(ServerToClient::Reset(reason)) => Err(TransportError::Reset(reason)),
            None => {
                self.data_ended = true;
                Ok(Http2Event::End)
            }
        }
    }

    fn reset(&mut self, reason: RstStreamReason) {
        let _ = self.tx.try_send(ClientToServer::Reset(reason));
    }
}

impl InMemoryServerStream {
    /// Waits for the client's opening request. Returns `None` if the client
    /// dropped its side before ever starting the stream.
    pub async fn accept(&mut self) -> Option<ReceivedRequest> {
        match self.rx.recv().await {
            Some(ClientToServer::Request(request, end_stream)) => {
                Some(ReceivedRequest { request, end_stream })
            }
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl ServerStream for InMemoryServerStream {
    async fn send_response_headers(
        &mut self,
        status: u16,
        metadata: HeaderMap,
    ) -> Result<(), TransportError> {
        self.tx
            .send(ServerToClient::Headers(status, metadata))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), TransportError> {
        self.tx
            .send(ServerToClient::Data(data, end_stream))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_trailers(&mut self, trailers: HeaderMap) -> Result<(), TransportError> {
        self.tx
            .send(ServerToClient::Trailers(trailers))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_data(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.data_ended {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(ClientToServer::Data(data, end_stream)) => {
                if end_stream {
                    self.data_ended = true;
                }
                Ok(Some(data))
            }
            Some(ClientToServer::Reset(reason)) => Err(TransportError::Reset(reason)),
            Some(ClientToServer::Request(..)) | None => {
                self.data_ended = true;
                Ok(None)
            }
        }
    }

    fn reset(&mut self, reason: RstStreamReason) {
        let _ = self.tx.try_send(ServerToClient::Reset(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    #[tokio::test]
    async fn client_request_is_observed_by_server_accept() {
        let (mut client, mut server) = InMemoryClientStream::pair();
        let request = Request::builder()
            .method("POST")
            .uri("/echo.Echoer/Say")
            .body(())
            .unwrap();
        client.start(request, false).await.unwrap();

        let received = server.accept().await.unwrap();
        assert_eq!(received.request.uri().path(), "/echo.Echoer/Say");
        assert!(!received.end_stream);
    }

    #[tokio::test]
    async fn response_round_trips_headers_data_and_trailers() {
        let (mut client, mut server) = InMemoryClientStream::pair();
        let request = Request::builder().uri("/a/b").body(()).unwrap();
        client.start(request, true).await.unwrap();
        server.accept().await.unwrap();

        server
            .send_response_headers(200, HeaderMap::new())
            .await
            .unwrap();
        server
            .send_data(Bytes::from_static(b"hi"), false)
            .await
            .unwrap();
        server.send_trailers(HeaderMap::new()).await.unwrap();

        match client.recv_event().await.unwrap() {
            Http2Event::Headers { status, .. } => assert_eq!(status, 200),
            other => panic!("expected headers, got {other:?}"),
        }
        match client.recv_event().await.unwrap() {
            Http2Event::Data(data) => assert_eq!(data, Bytes::from_static(b"hi")),
            other => panic!("expected data, got {other:?}"),
        }
        match client.recv_event().await.unwrap() {
            Http2Event::Trailers(_) => {}
            other => panic!("expected trailers, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_server_surfaces_as_end_to_client() {
        let (mut client, server) = InMemoryClientStream::pair();
        let request = Request::builder().uri("/a/b").body(()).unwrap();
        client.start(request, true).await.unwrap();
        drop(server);

        match client.recv_event().await.unwrap() {
            Http2Event::End => {}
            other => panic!("expected End, got {other:?}"),
        }
    }
}
