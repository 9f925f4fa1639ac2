//! In-process HTTP origin used for smoke tests and the `hello_world` service.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Query;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::OriginError;

pub const HEALTH_ROUTE: &str = "/_health";
pub const WS_ROUTE: &str = "/ws";
pub const SSE_ROUTE: &str = "/sse";

const DEFAULT_SSE_FREQ: Duration = Duration::from_secs(1);

/// Binds the test origin on a loopback port and serves it until `shutdown`.
///
/// Bind errors are returned; errors after that go to `errors`.
pub async fn start(
    tasks: &TaskTracker,
    shutdown: CancellationToken,
    errors: mpsc::Sender<OriginError>,
) -> Result<SocketAddr, OriginError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|source| OriginError::Bind {
            service: "hello_world",
            source,
        })?;
    let addr = listener.local_addr().map_err(|source| OriginError::Bind {
        service: "hello_world",
        source,
    })?;

    tracing::info!(addr = %addr, "Starting hello world origin");

    tasks.spawn(async move {
        let served = axum::serve(listener, router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        match served {
            Ok(()) => tracing::debug!(addr = %addr, "Hello world origin stopped"),
            Err(source) => {
                tracing::error!(addr = %addr, error = %source, "Hello world origin failed");
                let _ = errors
                    .send(OriginError::Serve {
                        service: "hello_world",
                        source,
                    })
                    .await;
            }
        }
    });

    Ok(addr)
}

fn router() -> Router {
    Router::new()
        .route("/", get(|| async { "Hello from the tunnel origin\n" }))
        .route(HEALTH_ROUTE, get(|| async { "ok" }))
        .route(WS_ROUTE, get(ws_echo))
        .route(SSE_ROUTE, get(sse_push))
}

async fn ws_echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(echo)
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let reply = match msg {
            Message::Text(_) | Message::Binary(_) => msg,
            Message::Close(_) => return,
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            return;
        }
    }
}

/// Pushes `"{i}\n"` then `"\n"` every `freq`, forever.
async fn sse_push(Query(params): Query<HashMap<String, String>>) -> Response {
    let freq = match params.get("freq") {
        Some(raw) => match parse_duration(raw) {
            Some(freq) => freq,
            None => return (StatusCode::BAD_REQUEST, "invalid freq").into_response(),
        },
        None => DEFAULT_SSE_FREQ,
    };

    let events = stream::unfold(0u64, move |i| async move {
        tokio::time::sleep(freq).await;
        Some((i, i + 1))
    })
    .flat_map(|i| {
        stream::iter([
            Ok::<_, Infallible>(Bytes::from(format!("{}\n", i))),
            Ok(Bytes::from_static(b"\n")),
        ])
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(events),
    )
        .into_response()
}

/// Parses `10ms`, `2s`, `1m` or a bare millisecond count.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (value, unit) = raw.split_at(split);
    let value: u64 = value.parse().ok()?;

    match unit {
        "" | "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}
