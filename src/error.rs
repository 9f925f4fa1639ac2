//! Error types shared by the ingress table, origin services and relay handlers.

use thiserror::Error;

use crate::http::request::ConnectionType;

/// Boxed source error for failures coming from hyper, tungstenite or the socket layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single `OriginProxy::proxy` call.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No ingress rule accepted the request.
    #[error("no ingress rule matches host {host:?} path {path:?}")]
    NoRule { host: String, path: String },

    /// Dial, connect or handshake failure before anything was committed.
    #[error("origin {origin} unreachable: {source}")]
    OriginUnreachable {
        origin: String,
        #[source]
        source: BoxError,
    },

    /// The origin answered but not the way the exchange requires.
    #[error("origin {origin} protocol error: {reason}")]
    OriginProtocol { origin: String, reason: String },

    /// The resolved service cannot carry this kind of exchange.
    #[error("{service} origin cannot serve {connection_type} requests")]
    UnsupportedService {
        service: &'static str,
        connection_type: ConnectionType,
    },

    /// Read or write failure on an established exchange.
    #[error("bridge i/o error: {0}")]
    Bridge(#[source] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl ProxyError {
    pub(crate) fn unreachable(origin: impl Into<String>, source: impl Into<BoxError>) -> Self {
        ProxyError::OriginUnreachable {
            origin: origin.into(),
            source: source.into(),
        }
    }

    pub(crate) fn protocol(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        ProxyError::OriginProtocol {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}

/// Misuse of the tunnel-side channel, or a failure writing to it.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("response headers already written for this exchange")]
    HeadersAlreadyWritten,

    #[error("write after error response")]
    WriteAfterError,

    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle failure of an origin service.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("failed to bind {service} origin: {source}")]
    Bind {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} origin stopped: {source}")]
    Serve {
        service: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid configuration text.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("ingress must contain at least one rule")]
    NoRules,

    #[error("last ingress rule must match every hostname, got {0:?}")]
    MissingCatchAll(String),

    #[error("rule {index}: invalid path regex: {source}")]
    InvalidPath {
        index: usize,
        #[source]
        source: regex::Error,
    },

    #[error("rule {index}: invalid hostname {hostname:?}")]
    InvalidHostname { index: usize, hostname: String },

    #[error("rule {index}: unsupported service {service:?}: {reason}")]
    InvalidService {
        index: usize,
        service: String,
        reason: String,
    },
}
