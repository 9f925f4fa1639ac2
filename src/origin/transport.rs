//! HTTP origin transport.
//!
//! Plain requests go through a pooled hyper client. WebSocket upgrades use a
//! dedicated connection so the upgraded socket is owned by the exchange.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::client::conn::http1;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::task::TaskTracker;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use url::Url;

use crate::error::ProxyError;
use crate::http::headers::forwardable;
use crate::http::request::TunnelRequest;
use crate::origin::{OriginBody, OriginStream};

/// Shared, read-only HTTP client for one origin.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    connect_timeout: Duration,
    /// Tracker for upgrade connection drivers, set when the origin starts
    tasks: OnceLock<TaskTracker>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            connect_timeout,
            tasks: OnceLock::new(),
        }
    }

    /// Spawns later upgrade connection drivers on `tasks`, so shutdown
    /// draining waits for them.
    pub fn attach(&self, tasks: &TaskTracker) {
        let _ = self.tasks.set(tasks.clone());
    }

    /// Forwards `request` to `base` and returns the origin's response head
    /// with its body still streaming.
    pub async fn round_trip(
        &self,
        base: &Url,
        request: &TunnelRequest,
    ) -> Result<Response<OriginBody>, ProxyError> {
        let target = origin_uri(base, request);
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(&target);

        if let Some(headers) = builder.headers_mut() {
            *headers = forwardable(&request.headers);
            headers.insert(header::HOST, host_value(base)?);
        }

        let outbound = builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| ProxyError::unreachable(base.as_str(), e))?;

        tracing::trace!(origin = %base, target = %target, "Sending request to origin");

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| ProxyError::unreachable(base.as_str(), e))?;

        Ok(response.map(|body| body.boxed_unsync()))
    }

    /// Performs a WebSocket upgrade handshake against `base`.
    ///
    /// The peer's `Sec-WebSocket-Key` is forwarded when present so the
    /// origin's accept header stays valid for the tunnel client.
    pub async fn upgrade_websocket(
        &self,
        base: &Url,
        request: &TunnelRequest,
    ) -> Result<(OriginStream, HeaderMap), ProxyError> {
        let addr = socket_addr(base)?;
        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|e| ProxyError::unreachable(base.as_str(), e))?
            .map_err(|e| ProxyError::unreachable(base.as_str(), e))?;
        stream.set_nodelay(true).ok();

        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| ProxyError::unreachable(base.as_str(), e))?;

        let driver = async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(error = %e, "Origin upgrade connection closed");
            }
        };
        match self.tasks.get() {
            Some(tasks) => tasks.spawn(driver),
            None => tokio::spawn(driver),
        };

        let key = match request.headers.get(header::SEC_WEBSOCKET_KEY) {
            Some(key) => key.clone(),
            None => HeaderValue::from_str(&generate_key())
                .map_err(|e| ProxyError::protocol(base.as_str(), e.to_string()))?,
        };

        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(request.path_and_query());
        if let Some(headers) = builder.headers_mut() {
            *headers = forwardable(&request.headers);
            headers.insert(header::HOST, host_value(base)?);
            headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
            headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
            headers.insert(header::SEC_WEBSOCKET_KEY, key.clone());
            headers
                .entry(header::SEC_WEBSOCKET_VERSION)
                .or_insert(HeaderValue::from_static("13"));
        }
        let handshake = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProxyError::protocol(base.as_str(), e.to_string()))?;

        let response = sender
            .send_request(handshake)
            .await
            .map_err(|e| ProxyError::unreachable(base.as_str(), e))?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(ProxyError::protocol(
                base.as_str(),
                format!("websocket upgrade refused with status {}", response.status()),
            ));
        }

        let expected = derive_accept_key(key.as_bytes());
        let accepted = response
            .headers()
            .get(header::SEC_WEBSOCKET_ACCEPT)
            .is_some_and(|v| v.as_bytes() == expected.as_bytes());
        if !accepted {
            return Err(ProxyError::protocol(base.as_str(), "invalid Sec-WebSocket-Accept"));
        }

        let headers = response.headers().clone();
        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| ProxyError::protocol(base.as_str(), e.to_string()))?;

        Ok((Box::new(TokioIo::new(upgraded)), headers))
    }
}

/// Origin URL with the request's path and query.
fn origin_uri(base: &Url, request: &TunnelRequest) -> String {
    let mut target = base.clone();
    let pq = request.path_and_query();
    match pq.split_once('?') {
        Some((path, query)) => {
            target.set_path(path);
            target.set_query(Some(query));
        }
        None => {
            target.set_path(pq);
            target.set_query(None);
        }
    }
    target.to_string()
}

fn socket_addr(base: &Url) -> Result<String, ProxyError> {
    let host = base
        .host_str()
        .ok_or_else(|| ProxyError::protocol(base.as_str(), "origin URL missing host"))?;
    let port = base.port_or_known_default().unwrap_or(80);
    Ok(format!("{}:{}", host, port))
}

fn host_value(base: &Url) -> Result<HeaderValue, ProxyError> {
    let host = base
        .host_str()
        .ok_or_else(|| ProxyError::protocol(base.as_str(), "origin URL missing host"))?;
    let value = match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).map_err(|e| ProxyError::protocol(base.as_str(), e.to_string()))
}
