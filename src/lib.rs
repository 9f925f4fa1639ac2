//! Tunnel origin - dispatch and protocol relay for a reverse-tunnel client
//!
//! Resolves each tunnel request to an origin service through the ingress
//! table and relays it as plain HTTP, WebSocket or raw TCP.

pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod ingress;
pub mod origin;
pub mod proxy;

pub use channel::{DuplexChannel, ERROR_RESPONSE_BODY};
pub use error::{ChannelError, OriginError, ProxyError};
pub use crate::http::request::{ConnectionType, TunnelRequest};
pub use ingress::{Ingress, Rule};
pub use origin::OriginService;
pub use proxy::OriginProxy;
