//! The HTTP/2 listener: accepts TCP connections, speaks `h2` on each, and
//! dispatches every inbound stream by `:path` to the registered handler via
//! [`talon_session::server::Http2ServerCall`].

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use talon_filters::FilterStack;
use talon_session::server::Http2ServerCall;
use talon_wire::{Metadata, MetadataValue, Status};

use crate::registry::MethodRegistry;
use crate::transport::H2ServerStream;

/// A bound RPC server: a method registry plus the filter stack every call
/// runs through. Cloning shares both (cheap: registry lookups are read-only
/// after startup, filters are per-call instantiations of a shared stack).
#[derive(Clone)]
pub struct Server {
    registry: Arc<MethodRegistry>,
    filter_stack: FilterStack,
}

impl Server {
    pub fn new(registry: MethodRegistry, filter_stack: FilterStack) -> Self {
        Server {
            registry: Arc::new(registry),
            filter_stack,
        }
    }

    /// Accepts connections from `listener` forever, each on its own task, each
    /// multiplexing its own streams onto further tasks. Returns only if
    /// `accept()` itself fails (the listening socket went away).
    pub async fn serve(self, listener: TcpListener) -> Result<(), Status> {
        loop {
            let (socket, peer) = listener
                .accept()
                .await
                .map_err(|e| Status::new(talon_wire::Code::Unavailable, format!("accept failed: {e}")))?;
            let _ = socket.set_nodelay(true);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(error) = server.serve_connection(socket).await {
                    tracing::debug!(%peer, %error, "h2 connection ended");
                }
            });
        }
    }

    async fn serve_connection(self, socket: TcpStream) -> Result<(), h2::Error> {
        let mut connection = h2::server::handshake(socket).await?;
        while let Some(result) = connection.accept().await {
            let (request, respond) = result?;
            let server = self.clone();
            tokio::spawn(server.serve_stream(request, respond));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, request, respond), fields(method = %request.uri().path()))]
    async fn serve_stream(
        self,
        request: http::Request<h2::RecvStream>,
        respond: h2::server::SendResponse<bytes::Bytes>,
    ) {
        let method_path = request.uri().path().to_string();
        let (metadata, _errors) = Metadata::from_wire_headers(request.headers());
        let deadline = metadata
            .get_one("grpc-timeout")
            .and_then(|value| match value {
                MetadataValue::Ascii(raw) => talon_wire::deadline::parse_timeout(raw).ok(),
                MetadataValue::Binary(_) => None,
            });
        let handler = self.registry.lookup(&method_path);

        let stream = H2ServerStream {
            respond,
            send_stream: None,
            body: request.into_body(),
        };
        let call = Http2ServerCall::new(method_path, metadata, deadline, handler, self.filter_stack.instantiate());
        call.run(Box::new(stream)).await;
    }
}
