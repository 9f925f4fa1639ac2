use std::fmt;

use bytes::Bytes;
use http::header::{HOST, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use tokio_util::sync::CancellationToken;

/// How the tunnel peer expects the exchange to be carried.
///
/// Server-sent events are not a separate type: they are plain `Http`
/// exchanges whose origin keeps flushing small chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Request/response, body streamed chunk by chunk
    Http,
    /// HTTP upgraded to a WebSocket, then bridged
    WebSocket,
    /// Raw TCP bridged after a dial
    Tcp,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Http => f.write_str("http"),
            ConnectionType::WebSocket => f.write_str("websocket"),
            ConnectionType::Tcp => f.write_str("tcp"),
        }
    }
}

/// A request delivered by the tunnel transport.
///
/// Carries everything needed to pick an ingress rule and contact the origin,
/// plus the token that ends the request's lifetime when the tunnel peer goes
/// away.
#[derive(Debug, Clone)]
pub struct TunnelRequest {
    /// The HTTP method
    pub method: Method,
    /// Target URI, absolute (`http://host/path?q`) or origin-form (`/path?q`)
    pub uri: Uri,
    /// Request headers as received from the tunnel peer
    pub headers: HeaderMap,
    /// Buffered request body
    pub body: Bytes,
    lifetime: CancellationToken,
}

/// Builder for constructing [`TunnelRequest`] objects.
pub struct TunnelRequestBuilder {
    method: Method,
    uri: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
    lifetime: Option<CancellationToken>,
}

/// Error returned by [`TunnelRequestBuilder::build`].
#[derive(Debug, thiserror::Error)]
pub enum RequestBuildError {
    #[error("uri missing")]
    MissingUri,
    #[error("invalid uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),
    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),
    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
}

impl TunnelRequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            uri: None,
            headers: Vec::new(),
            body: Bytes::new(),
            lifetime: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Ties the request to an externally owned lifetime.
    pub fn lifetime(mut self, token: CancellationToken) -> Self {
        self.lifetime = Some(token);
        self
    }

    pub fn build(self) -> Result<TunnelRequest, RequestBuildError> {
        let uri: Uri = self.uri.ok_or(RequestBuildError::MissingUri)?.parse()?;

        let mut headers = HeaderMap::new();
        for (key, value) in self.headers {
            headers.append(
                HeaderName::from_bytes(key.as_bytes())?,
                HeaderValue::from_str(&value)?,
            );
        }

        Ok(TunnelRequest {
            method: self.method,
            uri,
            headers,
            body: self.body,
            lifetime: self.lifetime.unwrap_or_default(),
        })
    }
}

impl Default for TunnelRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelRequest {
    pub fn builder() -> TunnelRequestBuilder {
        TunnelRequestBuilder::new()
    }

    /// Retrieves a header value by name as a string.
    ///
    /// Returns `None` when the header is missing or not valid visible ASCII.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Host authority as sent by the peer, port included.
    ///
    /// The `Host` header wins over the URI authority.
    pub fn authority(&self) -> Option<&str> {
        self.header(HOST.as_str())
            .filter(|h| !h.is_empty())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    /// Hostname used for ingress matching: the authority without its port.
    pub fn hostname(&self) -> &str {
        self.authority().map(strip_port).unwrap_or("")
    }

    /// URI path, `/` when empty.
    pub fn path(&self) -> &str {
        match self.uri.path() {
            "" => "/",
            p => p,
        }
    }

    /// Path plus query, as sent to an HTTP origin.
    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/")
    }

    /// Token cancelled when the tunnel peer abandons this request.
    pub fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }
}

fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        // bracketed IPv6 literal
        return rest.split(']').next().unwrap_or(rest);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            host
        }
        _ => authority,
    }
}
