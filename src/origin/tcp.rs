//! Raw TCP destinations: static, bastion (per-request header) and
//! private-network (request host).

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::error::ProxyError;
use crate::http::headers::{JUMP_DESTINATION_HEADER, PROXY_SOURCE_HEADER};
use crate::http::request::TunnelRequest;

/// How a TCP origin picks the address to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Address fixed in configuration
    Static(String),
    /// Address carried by the jump-destination header
    Bastion,
    /// The request's own host authority, for private-network clients
    PrivateNetwork,
}

impl Destination {
    /// Resolves the `host:port` to dial for `request`.
    pub fn resolve(&self, request: &TunnelRequest) -> Result<String, ProxyError> {
        match self {
            Destination::Static(addr) => Ok(addr.clone()),
            Destination::Bastion => {
                let value = request.header(JUMP_DESTINATION_HEADER).ok_or_else(|| {
                    ProxyError::protocol(
                        "bastion",
                        format!("missing {} header", JUMP_DESTINATION_HEADER),
                    )
                })?;
                bastion_address(value)
            }
            Destination::PrivateNetwork => {
                if request.header(PROXY_SOURCE_HEADER).is_none() {
                    return Err(ProxyError::protocol(
                        "private_network",
                        format!("missing {} header", PROXY_SOURCE_HEADER),
                    ));
                }
                request
                    .authority()
                    .map(str::to_string)
                    .ok_or_else(|| ProxyError::protocol("private_network", "request has no host"))
            }
        }
    }
}

/// Normalizes a jump-destination value: `host:port` or `scheme://host:port`.
fn bastion_address(value: &str) -> Result<String, ProxyError> {
    let value = value.trim();
    if value.contains("://") {
        let url = Url::parse(value)
            .map_err(|e| ProxyError::protocol("bastion", format!("invalid destination: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::protocol("bastion", "destination missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyError::protocol("bastion", "destination missing port"))?;
        return Ok(format!("{}:{}", host, port));
    }

    match value.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(value.to_string())
        }
        _ => Err(ProxyError::protocol(
            "bastion",
            format!("destination {:?} is not host:port", value),
        )),
    }
}

/// Dials `addr` within `connect_timeout`.
pub async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream, ProxyError> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|e| ProxyError::unreachable(addr, e))?
        .map_err(|e| ProxyError::unreachable(addr, e))?;
    stream.set_nodelay(true).ok();

    tracing::trace!(addr = %addr, "Connected to TCP origin");
    Ok(stream)
}
