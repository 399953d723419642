//! The server-side `h2` adapter: an [`h2::server::SendResponse`] and
//! [`h2::RecvStream`] pair, wrapped to satisfy
//! [`talon_session::transport::ServerStream`]. Mirrors
//! `talon-channel::connector::H2ClientStream`'s treatment of the client
//! side of the same `h2` crate boundary.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::poll_fn;
use http::{HeaderMap, Response};

use talon_session::transport::{ServerStream, TransportError};
use talon_wire::RstStreamReason;

pub(crate) struct H2ServerStream {
    pub(crate) respond: h2::server::SendResponse<Bytes>,
    pub(crate) send_stream: Option<h2::SendStream<Bytes>>,
    pub(crate) body: h2::RecvStream,
}

#[async_trait]
impl ServerStream for H2ServerStream {
    async fn send_response_headers(&mut self, status: u16, metadata: HeaderMap) -> Result<(), TransportError> {
        let mut response = Response::builder()
            .status(status)
            .body(())
            .unwrap_or_else(|_| Response::new(()));
        *response.headers_mut() = metadata;

        let send_stream = self.respond.send_response(response, false).map_err(h2_error)?;
        self.send_stream = Some(send_stream);
        Ok(())
    }

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), TransportError> {
        let send_stream = self
            .send_stream
            .as_mut()
            .ok_or(TransportError::Other("response headers not sent".into()))?;

        if !data.is_empty() {
            send_stream.reserve_capacity(data.len());
            poll_fn(|cx| send_stream.poll_capacity(cx))
                .await
                .transpose()
                .map_err(h2_error)?;
        }
        send_stream.send_data(data, end_stream).map_err(h2_error)
    }

    async fn send_trailers(&mut self, trailers: HeaderMap) -> Result<(), TransportError> {
        let send_stream = self
            .send_stream
            .as_mut()
            .ok_or(TransportError::Other("response headers not sent".into()))?;
        send_stream.send_trailers(trailers).map_err(h2_error)
    }

    async fn recv_data(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.body.data().await {
            Some(Ok(chunk)) => {
                let _ = self.body.flow_control().release_capacity(chunk.len());
                Ok(Some(chunk))
            }
            Some(Err(error)) => Err(h2_error(error)),
            None => Ok(None),
        }
    }

    fn reset(&mut self, reason: RstStreamReason) {
        if let Some(send_stream) = &mut self.send_stream {
            send_stream.send_reset(h2_reason(reason));
        }
    }
}

fn h2_error(error: h2::Error) -> TransportError {
    if let Some(reason) = error.reason() {
        TransportError::Reset(from_h2_reason(reason))
    } else {
        TransportError::Other(error.to_string())
    }
}

fn h2_reason(reason: RstStreamReason) -> h2::Reason {
    match reason {
        RstStreamReason::Cancel => h2::Reason::CANCEL,
        RstStreamReason::RefusedStream => h2::Reason::REFUSED_STREAM,
        RstStreamReason::EnhanceYourCalm => h2::Reason::ENHANCE_YOUR_CALM,
        RstStreamReason::InadequateSecurity => h2::Reason::INADEQUATE_SECURITY,
        RstStreamReason::Other(code) => h2::Reason::from(code),
    }
}

fn from_h2_reason(reason: h2::Reason) -> RstStreamReason {
    match reason {
        h2::Reason::CANCEL => RstStreamReason::Cancel,
        h2::Reason::REFUSED_STREAM => RstStreamReason::RefusedStream,
        h2::Reason::ENHANCE_YOUR_CALM => RstStreamReason::EnhanceYourCalm,
        h2::Reason::INADEQUATE_SECURITY => RstStreamReason::InadequateSecurity,
        other => RstStreamReason::Other(other.into()),
    }
}
