//! Origin dispatch.
//!
//! [`OriginProxy::proxy`] is the single entry point used by the tunnel
//! transport: it resolves the ingress rule, picks the relay handler from the
//! connection type alone, and turns handler failures into wire responses.
//!
//! ```text
//!  request + ConnectionType
//!          │
//!          ▼
//!   Ingress::resolve ── no rule ──► 404, ProxyError::NoRule
//!          │
//!          ▼
//!   Http ─► http_stream   WebSocket ─► websocket   Tcp ─► tcp
//!          │
//!          ├─ Ok                         ► headers already written
//!          └─ Err before commit          ► 502 error response
//! ```

pub mod bridge;
pub mod http_stream;
pub mod tcp;
pub mod websocket;

use http::{HeaderMap, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::channel::{DuplexChannel, Exchange, Lifetime};
use crate::error::ProxyError;
use crate::http::request::{ConnectionType, TunnelRequest};
use crate::ingress::Ingress;

/// Dispatches tunnel requests to origins.
///
/// Shared by all concurrent exchanges; holds only the started ingress table
/// and the tunnel's shutdown signal.
#[derive(Debug, Clone)]
pub struct OriginProxy {
    ingress: Ingress,
    shutdown: CancellationToken,
}

impl OriginProxy {
    pub fn new(ingress: Ingress, shutdown: CancellationToken) -> Self {
        Self { ingress, shutdown }
    }

    pub fn ingress(&self) -> &Ingress {
        &self.ingress
    }

    /// Serves one request on `channel`.
    ///
    /// Exactly one of {success headers, error response} is written. The
    /// error is returned either way so the transport can log it.
    pub async fn proxy<C>(
        &self,
        channel: &mut C,
        request: TunnelRequest,
        connection_type: ConnectionType,
    ) -> Result<(), ProxyError>
    where
        C: DuplexChannel + ?Sized,
    {
        let mut exchange = Exchange::new(channel);
        let lifetime = Lifetime::new(request.lifetime().clone(), self.shutdown.clone());

        let hostname = request.hostname();
        let path = request.path();

        let Some(rule) = self.ingress.resolve(hostname, path) else {
            tracing::warn!(host = %hostname, path = %path, "No ingress rule matched");
            exchange
                .write_response_headers(StatusCode::NOT_FOUND, &HeaderMap::new())
                .await?;
            return Err(ProxyError::NoRule {
                host: hostname.to_string(),
                path: path.to_string(),
            });
        };
        let service = rule.service.as_ref();

        tracing::debug!(
            host = %hostname,
            path = %path,
            connection_type = %connection_type,
            origin = service.kind(),
            "Proxying request"
        );

        let result = match connection_type {
            ConnectionType::Http => {
                http_stream::proxy_http(service, &mut exchange, &request, &lifetime).await
            }
            ConnectionType::WebSocket => {
                websocket::proxy_websocket(service, &mut exchange, &request, &lifetime).await
            }
            ConnectionType::Tcp => tcp::proxy_tcp(service, &mut exchange, &request, &lifetime).await,
        };

        if let Err(e) = &result {
            if exchange.write_error_response().await {
                tracing::warn!(
                    host = %hostname,
                    connection_type = %connection_type,
                    origin = service.kind(),
                    error = %e,
                    "Origin request failed"
                );
            } else {
                tracing::debug!(
                    host = %hostname,
                    connection_type = %connection_type,
                    error = %e,
                    "Exchange failed after response was committed"
                );
            }
        }

        result
    }
}
