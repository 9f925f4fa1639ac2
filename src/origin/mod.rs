//! Origin services: how to reach the backend an ingress rule points at.
//!
//! An [`OriginService`] is started once, then shared read-only by every
//! exchange routed to it. Each relay handler asks it for one thing:
//!
//! - [`OriginService::round_trip`] for plain HTTP (and SSE),
//! - [`OriginService::open_websocket`] for upgraded exchanges,
//! - [`OriginService::open_stream`] for raw TCP.
//!
//! A service that cannot carry the requested kind of exchange answers with
//! [`ProxyError::UnsupportedService`] instead of coercing it.

pub mod hello;
pub mod tcp;
pub mod transport;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{OnceCell, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::error::{OriginError, ProxyError};
use crate::http::request::{ConnectionType, TunnelRequest};

pub use self::tcp::Destination;
pub use self::transport::HttpTransport;

/// Default timeout for dialing an origin.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body streamed back from an HTTP origin.
pub type OriginBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Byte stream to an origin once an exchange is bridged.
pub trait OriginIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> OriginIo for T {}

pub type OriginStream = Box<dyn OriginIo>;

/// A backend reachable through the tunnel.
#[derive(Debug)]
pub enum OriginService {
    /// HTTP server at `url`
    ReverseHttp { url: Url, transport: HttpTransport },
    /// Answers every request with a fixed status and an empty body
    FixedStatus(StatusCode),
    /// In-process test server, bound on start
    HelloWorld {
        addr: OnceCell<SocketAddr>,
        transport: HttpTransport,
    },
    /// Raw TCP destination
    Tcp {
        destination: Destination,
        connect_timeout: Duration,
    },
}

impl OriginService {
    pub fn reverse_http(url: Url, connect_timeout: Duration) -> Self {
        OriginService::ReverseHttp {
            url,
            transport: HttpTransport::new(connect_timeout),
        }
    }

    pub fn fixed_status(status: StatusCode) -> Self {
        OriginService::FixedStatus(status)
    }

    pub fn hello_world(connect_timeout: Duration) -> Self {
        OriginService::HelloWorld {
            addr: OnceCell::new(),
            transport: HttpTransport::new(connect_timeout),
        }
    }

    pub fn tcp(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        OriginService::Tcp {
            destination: Destination::Static(addr.into()),
            connect_timeout,
        }
    }

    pub fn bastion(connect_timeout: Duration) -> Self {
        OriginService::Tcp {
            destination: Destination::Bastion,
            connect_timeout,
        }
    }

    pub fn private_network(connect_timeout: Duration) -> Self {
        OriginService::Tcp {
            destination: Destination::PrivateNetwork,
            connect_timeout,
        }
    }

    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            OriginService::ReverseHttp { .. } => "http",
            OriginService::FixedStatus(_) => "http_status",
            OriginService::HelloWorld { .. } => "hello_world",
            OriginService::Tcp {
                destination: Destination::Static(_),
                ..
            } => "tcp",
            OriginService::Tcp {
                destination: Destination::Bastion,
                ..
            } => "bastion",
            OriginService::Tcp {
                destination: Destination::PrivateNetwork,
                ..
            } => "private_network",
        }
    }

    /// Spins up background resources.
    ///
    /// The hello world origin binds a listener and serves until `shutdown`
    /// fires, reporting late failures on `errors`. Concurrent or repeated
    /// starts bind it once. HTTP origins register `tasks` for their upgrade
    /// connections.
    pub async fn start(
        &self,
        tasks: &TaskTracker,
        shutdown: CancellationToken,
        errors: mpsc::Sender<OriginError>,
    ) -> Result<(), OriginError> {
        match self {
            OriginService::HelloWorld { addr, transport } => {
                transport.attach(tasks);
                addr.get_or_try_init(|| hello::start(tasks, shutdown, errors))
                    .await?;
                Ok(())
            }
            OriginService::ReverseHttp { transport, .. } => {
                transport.attach(tasks);
                Ok(())
            }
            OriginService::FixedStatus(_) | OriginService::Tcp { .. } => Ok(()),
        }
    }

    /// Executes a plain HTTP request against the origin.
    pub async fn round_trip(
        &self,
        request: &TunnelRequest,
    ) -> Result<Response<OriginBody>, ProxyError> {
        match self {
            OriginService::ReverseHttp { url, transport } => {
                transport.round_trip(url, request).await
            }
            OriginService::HelloWorld { transport, .. } => {
                transport.round_trip(&self.hello_url()?, request).await
            }
            OriginService::FixedStatus(status) => {
                let body: OriginBody = Empty::<Bytes>::new()
                    .map_err(|never| match never {})
                    .boxed_unsync();
                let mut response = Response::new(body);
                *response.status_mut() = *status;
                Ok(response)
            }
            OriginService::Tcp { .. } => Err(self.unsupported(ConnectionType::Http)),
        }
    }

    /// Opens a stream for a WebSocket exchange.
    ///
    /// HTTP origins perform a real upgrade handshake; TCP origins are dialed
    /// directly and carry the already-framed bytes as-is.
    pub async fn open_websocket(
        &self,
        request: &TunnelRequest,
    ) -> Result<(OriginStream, HeaderMap), ProxyError> {
        match self {
            OriginService::ReverseHttp { url, transport } => {
                transport.upgrade_websocket(url, request).await
            }
            OriginService::HelloWorld { transport, .. } => {
                transport.upgrade_websocket(&self.hello_url()?, request).await
            }
            OriginService::Tcp { .. } => {
                let stream = self.open_stream(request).await?;
                Ok((stream, HeaderMap::new()))
            }
            OriginService::FixedStatus(_) => Err(self.unsupported(ConnectionType::WebSocket)),
        }
    }

    /// Dials the TCP destination for `request`.
    pub async fn open_stream(&self, request: &TunnelRequest) -> Result<OriginStream, ProxyError> {
        match self {
            OriginService::Tcp {
                destination,
                connect_timeout,
            } => {
                let addr = destination.resolve(request)?;
                let stream = tcp::dial(&addr, *connect_timeout).await?;
                Ok(Box::new(stream))
            }
            OriginService::ReverseHttp { .. }
            | OriginService::FixedStatus(_)
            | OriginService::HelloWorld { .. } => Err(self.unsupported(ConnectionType::Tcp)),
        }
    }

    fn hello_url(&self) -> Result<Url, ProxyError> {
        let addr = match self {
            OriginService::HelloWorld { addr, .. } => addr.get(),
            _ => None,
        };
        let addr = addr.ok_or_else(|| {
            ProxyError::unreachable("hello_world", "hello world origin not started")
        })?;
        Url::parse(&format!("http://{}", addr))
            .map_err(|e| ProxyError::unreachable("hello_world", e))
    }

    fn unsupported(&self, connection_type: ConnectionType) -> ProxyError {
        ProxyError::UnsupportedService {
            service: self.kind(),
            connection_type,
        }
    }
}
