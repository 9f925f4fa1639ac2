//! Plain HTTP relay. Server-sent events need no separate path: every body
//! frame from the origin is written and flushed on its own.

use http_body_util::BodyExt;

use crate::channel::{DuplexChannel, Exchange, Lifetime};
use crate::error::ProxyError;
use crate::http::headers::forwardable;
use crate::http::request::TunnelRequest;
use crate::origin::OriginService;

pub async fn proxy_http<C>(
    service: &OriginService,
    exchange: &mut Exchange<'_, C>,
    request: &TunnelRequest,
    lifetime: &Lifetime,
) -> Result<(), ProxyError>
where
    C: DuplexChannel + ?Sized,
{
    let response = tokio::select! {
        res = service.round_trip(request) => res?,
        _ = lifetime.cancelled() => {
            return Err(ProxyError::unreachable(service.kind(), "request cancelled before origin responded"));
        }
    };

    // the body is relayed already de-chunked, so origin framing must not leak
    let (parts, mut body) = response.into_parts();
    exchange
        .write_response_headers(parts.status, &forwardable(&parts.headers))
        .await?;

    tracing::debug!(
        origin = service.kind(),
        status = parts.status.as_u16(),
        path = %request.path(),
        "Origin responded"
    );

    let mut chunks = 0usize;
    loop {
        let frame = tokio::select! {
            frame = body.frame() => frame,
            _ = lifetime.cancelled() => {
                tracing::debug!(chunks, "Request cancelled while streaming body");
                return Ok(());
            }
        };

        match frame {
            None => break,
            Some(Ok(frame)) => {
                // trailers are not relayed
                if let Ok(data) = frame.into_data() {
                    if data.is_empty() {
                        continue;
                    }
                    exchange.write_chunk(&data).await?;
                    chunks += 1;
                }
            }
            Some(Err(e)) => return Err(ProxyError::Bridge(std::io::Error::other(e))),
        }
    }

    tracing::trace!(chunks, "Response body complete");
    Ok(())
}
