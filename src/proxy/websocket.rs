use http::StatusCode;

use crate::channel::{DuplexChannel, Exchange, Lifetime};
use crate::error::ProxyError;
use crate::http::request::TunnelRequest;
use crate::origin::OriginService;
use crate::proxy::bridge::bridge;

/// Upgrades the origin side, marks the exchange with 101 and bridges the
/// already-framed WebSocket bytes in both directions.
pub async fn proxy_websocket<C>(
    service: &OriginService,
    exchange: &mut Exchange<'_, C>,
    request: &TunnelRequest,
    lifetime: &Lifetime,
) -> Result<(), ProxyError>
where
    C: DuplexChannel + ?Sized,
{
    let (origin, headers) = tokio::select! {
        res = service.open_websocket(request) => res?,
        _ = lifetime.cancelled() => {
            return Err(ProxyError::unreachable(service.kind(), "request cancelled during upgrade"));
        }
    };

    exchange
        .write_response_headers(StatusCode::SWITCHING_PROTOCOLS, &headers)
        .await?;

    tracing::debug!(origin = service.kind(), path = %request.path(), "WebSocket established");

    let end = bridge(origin, exchange, lifetime)
        .await
        .map_err(ProxyError::Bridge)?;

    tracing::debug!(origin = service.kind(), end = ?end, "WebSocket closed");
    Ok(())
}
