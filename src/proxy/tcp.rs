use http::{HeaderMap, StatusCode};

use crate::channel::{DuplexChannel, Exchange, Lifetime};
use crate::error::ProxyError;
use crate::http::headers::PROXY_SOURCE_HEADER;
use crate::http::request::TunnelRequest;
use crate::origin::OriginService;
use crate::proxy::bridge::bridge;

/// Dials the TCP origin, marks the stream established with 101 and bridges
/// raw bytes.
///
/// 101 is only a "stream ready" marker here; no protocol negotiation takes
/// place at this layer.
pub async fn proxy_tcp<C>(
    service: &OriginService,
    exchange: &mut Exchange<'_, C>,
    request: &TunnelRequest,
    lifetime: &Lifetime,
) -> Result<(), ProxyError>
where
    C: DuplexChannel + ?Sized,
{
    let origin = tokio::select! {
        res = service.open_stream(request) => res?,
        _ = lifetime.cancelled() => {
            return Err(ProxyError::unreachable(service.kind(), "request cancelled during dial"));
        }
    };

    exchange
        .write_response_headers(StatusCode::SWITCHING_PROTOCOLS, &HeaderMap::new())
        .await?;

    tracing::debug!(
        origin = service.kind(),
        private_network = request.header(PROXY_SOURCE_HEADER).is_some(),
        "TCP stream established"
    );

    let end = bridge(origin, exchange, lifetime)
        .await
        .map_err(ProxyError::Bridge)?;

    tracing::debug!(origin = service.kind(), end = ?end, "TCP stream closed");
    Ok(())
}
