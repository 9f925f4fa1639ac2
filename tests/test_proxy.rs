//! Tests for plain HTTP dispatch through the origin proxy

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use http::{HeaderMap, StatusCode};
use url::Url;

use common::{RecordingChannel, closed_addr, serve, start_proxy};
use tunnel_origin::ingress::{HostMatcher, PathMatcher, Rule};
use tunnel_origin::origin::hello::HEALTH_ROUTE;
use tunnel_origin::origin::DEFAULT_CONNECT_TIMEOUT;
use tunnel_origin::{
    ConnectionType, ERROR_RESPONSE_BODY, OriginService, ProxyError, TunnelRequest,
};

fn get(url: &str) -> TunnelRequest {
    TunnelRequest::builder().uri(url).build().unwrap()
}

fn host_rule(host: &str, service: OriginService) -> Rule {
    Rule::new(HostMatcher::parse(host).unwrap(), None, Arc::new(service))
}

#[tokio::test]
async fn test_proxy_single_hello_origin() {
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::hello_world(DEFAULT_CONNECT_TIMEOUT),
    ))])
    .await;

    let mut channel = RecordingChannel::new();
    proxy
        .proxy(&mut channel, get("http://localhost:8080"), ConnectionType::Http)
        .await
        .unwrap();

    assert_eq!(channel.status, Some(StatusCode::OK));
    assert_eq!(channel.header_writes, 1);
    assert!(!channel.body.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_multiple_origins() {
    let api = serve(Router::new().fallback(|| async { (StatusCode::CREATED, "Created") })).await;
    let api_url = Url::parse(&format!("http://{}", api)).unwrap();

    let rules = vec![
        host_rule(
            "api.example.com",
            OriginService::reverse_http(api_url, DEFAULT_CONNECT_TIMEOUT),
        ),
        host_rule(
            "hello.example.com",
            OriginService::hello_world(DEFAULT_CONNECT_TIMEOUT),
        ),
        Rule::new(
            HostMatcher::parse("health.example.com").unwrap(),
            Some(PathMatcher::new("/health").unwrap()),
            Arc::new(OriginService::fixed_status(StatusCode::OK)),
        ),
        Rule::catch_all(Arc::new(OriginService::fixed_status(StatusCode::NOT_FOUND))),
    ];
    let (proxy, harness) = start_proxy(rules).await;

    let hello_health = format!("http://hello.example.com{}", HEALTH_ROUTE);
    let cases: Vec<(&str, StatusCode, Option<&str>)> = vec![
        ("http://api.example.com", StatusCode::CREATED, Some("Created")),
        (hello_health.as_str(), StatusCode::OK, Some("ok")),
        ("http://health.example.com/health", StatusCode::OK, None),
        ("http://health.example.com/", StatusCode::NOT_FOUND, None),
        ("http://not-found.example.com", StatusCode::NOT_FOUND, None),
    ];

    for (url, expected_status, expected_body) in cases {
        let mut channel = RecordingChannel::new();
        proxy
            .proxy(&mut channel, get(url), ConnectionType::Http)
            .await
            .unwrap();

        assert_eq!(channel.status, Some(expected_status), "{}", url);
        assert_eq!(channel.header_writes, 1, "{}", url);
        match expected_body {
            Some(body) => assert_eq!(channel.body_str(), body, "{}", url),
            None => assert!(channel.body.is_empty(), "{}", url),
        }
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_forwards_method_path_and_body() {
    let echo = serve(Router::new().fallback(
        |method: http::Method, uri: http::Uri, body: String| async move {
            format!("{} {} {}", method, uri, body)
        },
    ))
    .await;
    let url = Url::parse(&format!("http://{}", echo)).unwrap();
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::reverse_http(url, DEFAULT_CONNECT_TIMEOUT),
    ))])
    .await;

    let request = TunnelRequest::builder()
        .method(http::Method::POST)
        .uri("http://app.example.com/submit?x=1")
        .header("Connection", "keep-alive")
        .body("payload")
        .build()
        .unwrap();

    let mut channel = RecordingChannel::new();
    proxy
        .proxy(&mut channel, request, ConnectionType::Http)
        .await
        .unwrap();

    assert_eq!(channel.status, Some(StatusCode::OK));
    assert_eq!(channel.body_str(), "POST /submit?x=1 payload");

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_error_writes_bad_gateway() {
    let dead = Url::parse(&format!("http://{}", closed_addr().await)).unwrap();
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::reverse_http(dead, Duration::from_secs(2)),
    ))])
    .await;

    let mut channel = RecordingChannel::new();
    let err = proxy
        .proxy(&mut channel, get("http://127.0.0.1"), ConnectionType::Http)
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::OriginUnreachable { .. }));
    assert_eq!(channel.status, Some(StatusCode::BAD_GATEWAY));
    assert_eq!(channel.header_writes, 1);
    assert_eq!(channel.body, ERROR_RESPONSE_BODY);

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_no_rule_is_not_found() {
    let (proxy, harness) = start_proxy(vec![host_rule(
        "only.example.com",
        OriginService::fixed_status(StatusCode::OK),
    )])
    .await;

    let mut channel = RecordingChannel::new();
    let err = proxy
        .proxy(&mut channel, get("http://other.example.com/"), ConnectionType::Http)
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::NoRule { ref host, .. } if host == "other.example.com"));
    assert_eq!(channel.status, Some(StatusCode::NOT_FOUND));
    assert_eq!(channel.header_writes, 1);
    assert!(channel.body.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_rule_order_wins() {
    let (proxy, harness) = start_proxy(vec![
        host_rule("api.example.com", OriginService::fixed_status(StatusCode::CREATED)),
        host_rule("*", OriginService::fixed_status(StatusCode::ACCEPTED)),
    ])
    .await;

    let mut channel = RecordingChannel::new();
    proxy
        .proxy(&mut channel, get("http://api.example.com/x"), ConnectionType::Http)
        .await
        .unwrap();
    assert_eq!(channel.status, Some(StatusCode::CREATED));

    let mut channel = RecordingChannel::new();
    proxy
        .proxy(&mut channel, get("http://www.example.com/x"), ConnectionType::Http)
        .await
        .unwrap();
    assert_eq!(channel.status, Some(StatusCode::ACCEPTED));

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_rejects_mismatched_connection_type() {
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::fixed_status(StatusCode::OK),
    ))])
    .await;

    for connection_type in [ConnectionType::Tcp, ConnectionType::WebSocket] {
        let mut channel = RecordingChannel::new();
        let err = proxy
            .proxy(&mut channel, get("http://tcp.example.com"), connection_type)
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::UnsupportedService { service: "http_status", .. }));
        assert_eq!(channel.status, Some(StatusCode::BAD_GATEWAY));
        assert_eq!(channel.header_writes, 1);
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_http_against_tcp_origin_fails_cleanly() {
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(OriginService::bastion(
        DEFAULT_CONNECT_TIMEOUT,
    )))])
    .await;

    let mut channel = RecordingChannel::new();
    let err = proxy
        .proxy(&mut channel, get("http://ssh.example.com"), ConnectionType::Http)
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::UnsupportedService { service: "bastion", .. }));
    assert_eq!(channel.status, Some(StatusCode::BAD_GATEWAY));

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_forwards_repeated_request_headers() {
    let echo = serve(Router::new().fallback(|headers: HeaderMap| async move {
        headers
            .get_all("x-forwarded-for")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }))
    .await;
    let url = Url::parse(&format!("http://{}", echo)).unwrap();
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::reverse_http(url, DEFAULT_CONNECT_TIMEOUT),
    ))])
    .await;

    let request = TunnelRequest::builder()
        .uri("http://app.example.com/")
        .header("X-Forwarded-For", "1.1.1.1")
        .header("X-Forwarded-For", "2.2.2.2")
        .build()
        .unwrap();

    let mut channel = RecordingChannel::new();
    proxy
        .proxy(&mut channel, request, ConnectionType::Http)
        .await
        .unwrap();

    assert_eq!(channel.body_str(), "1.1.1.1,2.2.2.2");

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_strips_hop_by_hop_response_headers() {
    let streamed = serve(Router::new().fallback(|| async {
        let chunks = stream::iter(["a", "b", "c"])
            .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c.as_bytes())));
        (
            [("connection", "keep-alive"), ("x-origin", "streamed")],
            Body::from_stream(chunks),
        )
    }))
    .await;
    let url = Url::parse(&format!("http://{}", streamed)).unwrap();
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::reverse_http(url, DEFAULT_CONNECT_TIMEOUT),
    ))])
    .await;

    let mut channel = RecordingChannel::new();
    proxy
        .proxy(&mut channel, get("http://app.example.com/"), ConnectionType::Http)
        .await
        .unwrap();

    assert_eq!(channel.status, Some(StatusCode::OK));
    assert_eq!(channel.body_str(), "abc");
    assert!(channel.headers.get(http::header::TRANSFER_ENCODING).is_none());
    assert!(channel.headers.get(http::header::CONNECTION).is_none());
    assert_eq!(channel.headers.get("x-origin").unwrap(), "streamed");

    harness.stop().await;
}

#[tokio::test]
async fn test_proxy_body_error_after_headers_is_not_rewritten() {
    let broken = serve(Router::new().fallback(|| async {
        let partial = stream::once(async { Ok(Bytes::from_static(b"partial")) });
        let failure = stream::once(async {
            // let the first chunk reach the wire before the connection is cut
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(std::io::Error::other("origin aborted"))
        });
        Body::from_stream(partial.chain(failure))
    }))
    .await;
    let url = Url::parse(&format!("http://{}", broken)).unwrap();
    let (proxy, harness) = start_proxy(vec![Rule::catch_all(Arc::new(
        OriginService::reverse_http(url, DEFAULT_CONNECT_TIMEOUT),
    ))])
    .await;

    let mut channel = RecordingChannel::new();
    let err = proxy
        .proxy(&mut channel, get("http://app.example.com/"), ConnectionType::Http)
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::Bridge(_)));
    assert_eq!(channel.status, Some(StatusCode::OK));
    assert_eq!(channel.header_writes, 1);
    assert_eq!(channel.body_str(), "partial");

    harness.stop().await;
}
