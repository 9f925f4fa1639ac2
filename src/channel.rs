//! The tunnel-side duplex channel and the per-exchange wrapper around it.
//!
//! A [`DuplexChannel`] is what the transport hands to the proxy for one
//! request: a byte stream in both directions plus a one-shot slot for the
//! response head. [`Exchange`] enforces the one-shot rule so that exactly one
//! of {response headers, error response} reaches the wire per request.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

/// Body written by the default [`DuplexChannel::write_error_response`].
pub const ERROR_RESPONSE_BODY: &[u8] = b"502 Bad Gateway: unable to reach the origin service";

/// Tunnel-side handle for a single exchange.
///
/// `AsyncWrite` carries body or stream data; each `poll_write` followed by a
/// flush is one unit the remote side observes. `AsyncRead` yields bytes sent
/// by the remote peer and is only used by the WebSocket and TCP bridges.
#[async_trait]
pub trait DuplexChannel: AsyncRead + AsyncWrite + Unpin + Send {
    /// Sends the response head. Called at most once per exchange.
    async fn write_response_headers(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> io::Result<()>;

    /// Sends a 502 with a fixed diagnostic body.
    async fn write_error_response(&mut self) {
        if self
            .write_response_headers(StatusCode::BAD_GATEWAY, &HeaderMap::new())
            .await
            .is_ok()
        {
            let _ = self.write_all(ERROR_RESPONSE_BODY).await;
            let _ = self.flush().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    Pending,
    HeadersWritten,
    ErrorWritten,
}

/// Lifetime of one exchange: ends when the request is abandoned or the
/// tunnel shuts down, whichever comes first.
#[derive(Debug, Clone)]
pub struct Lifetime {
    request: CancellationToken,
    shutdown: CancellationToken,
}

impl Lifetime {
    pub fn new(request: CancellationToken, shutdown: CancellationToken) -> Self {
        Self { request, shutdown }
    }

    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.request.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.request.is_cancelled() || self.shutdown.is_cancelled()
    }
}

/// Per-request view of a [`DuplexChannel`] that tracks what was committed.
pub struct Exchange<'a, C: ?Sized> {
    channel: &'a mut C,
    state: ResponseState,
}

impl<'a, C: DuplexChannel + ?Sized> Exchange<'a, C> {
    pub fn new(channel: &'a mut C) -> Self {
        Self {
            channel,
            state: ResponseState::Pending,
        }
    }

    /// Whether a success head or the error response was already sent.
    pub fn is_committed(&self) -> bool {
        self.state != ResponseState::Pending
    }

    pub async fn write_response_headers(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<(), ChannelError> {
        match self.state {
            ResponseState::Pending => {}
            ResponseState::HeadersWritten => return Err(ChannelError::HeadersAlreadyWritten),
            ResponseState::ErrorWritten => return Err(ChannelError::WriteAfterError),
        }
        self.state = ResponseState::HeadersWritten;
        self.channel.write_response_headers(status, headers).await?;
        Ok(())
    }

    /// Writes the error response unless something was already committed.
    ///
    /// Returns whether it was written.
    pub async fn write_error_response(&mut self) -> bool {
        if self.is_committed() {
            return false;
        }
        self.state = ResponseState::ErrorWritten;
        self.channel.write_error_response().await;
        true
    }

    /// Writes one chunk and flushes it so the peer sees it as its own unit.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), ChannelError> {
        if self.state == ResponseState::ErrorWritten {
            return Err(ChannelError::WriteAfterError);
        }
        self.channel.write_all(chunk).await?;
        self.channel.flush().await?;
        Ok(())
    }
}

impl<C: DuplexChannel + ?Sized> AsyncRead for Exchange<'_, C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().channel).poll_read(cx, buf)
    }
}

impl<C: DuplexChannel + ?Sized> AsyncWrite for Exchange<'_, C> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.state == ResponseState::ErrorWritten {
            return Poll::Ready(Err(io::Error::other(ChannelError::WriteAfterError)));
        }
        Pin::new(&mut *this.channel).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().channel).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().channel).poll_shutdown(cx)
    }
}
