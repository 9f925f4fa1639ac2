//! Mock tunnel channels and origin fixtures shared by the integration tests.
#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use tunnel_origin::error::OriginError;
use tunnel_origin::ingress::{Ingress, Rule};
use tunnel_origin::{DuplexChannel, OriginProxy};

/// Records the response head and every write; reads hit EOF immediately.
#[derive(Default)]
pub struct RecordingChannel {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub header_writes: usize,
    pub body: Vec<u8>,
    writes: Option<mpsc::UnboundedSender<Bytes>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forwards each write as its own item.
    pub fn streaming() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            writes: Some(tx),
            ..Self::default()
        };
        (channel, rx)
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

impl AsyncRead for RecordingChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for RecordingChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.body.extend_from_slice(buf);
        if let Some(tx) = &this.writes {
            let _ = tx.send(Bytes::copy_from_slice(buf));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl DuplexChannel for RecordingChannel {
    async fn write_response_headers(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> io::Result<()> {
        self.header_writes += 1;
        self.status = Some(status);
        self.headers = headers.clone();
        Ok(())
    }
}

/// Channel backed by an in-memory pipe; the test holds the other end.
pub struct PipeChannel {
    inner: DuplexStream,
    pub status: Option<StatusCode>,
    pub header_writes: usize,
    pub data_before_headers: bool,
}

pub fn pipe() -> (PipeChannel, DuplexStream) {
    let (inner, peer) = tokio::io::duplex(64 * 1024);
    let channel = PipeChannel {
        inner,
        status: None,
        header_writes: 0,
        data_before_headers: false,
    };
    (channel, peer)
}

impl AsyncRead for PipeChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PipeChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.status.is_none() {
            this.data_before_headers = true;
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl DuplexChannel for PipeChannel {
    async fn write_response_headers(
        &mut self,
        status: StatusCode,
        _headers: &HeaderMap,
    ) -> io::Result<()> {
        self.header_writes += 1;
        self.status = Some(status);
        Ok(())
    }
}

/// Started origins plus the handles needed to stop them.
pub struct Harness {
    pub shutdown: CancellationToken,
    pub tasks: TaskTracker,
    pub errors: mpsc::Receiver<OriginError>,
}

impl Harness {
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.tasks.close();
        tokio::time::timeout(Duration::from_secs(5), self.tasks.wait())
            .await
            .expect("origins did not stop");
    }
}

/// Starts every origin in `rules` and wraps them in a proxy.
pub async fn start_proxy(rules: Vec<Rule>) -> (OriginProxy, Harness) {
    let ingress = Ingress::new(rules);
    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();
    let (errors_tx, errors) = mpsc::channel(4);

    ingress
        .start_origins(&tasks, shutdown.clone(), errors_tx)
        .await
        .unwrap();

    let proxy = OriginProxy::new(ingress, shutdown.clone());
    (
        proxy,
        Harness {
            shutdown,
            tasks,
            errors,
        },
    )
}

/// Serves `router` on a loopback port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A loopback address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
