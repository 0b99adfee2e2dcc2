//! reqwest transport against a mock destination

mod integration;

use std::sync::Arc;
use std::time::Duration;

use integration::mock_server::MockServerFixture;
use integration::registry;
use mockito::Matcher;
use proxy_loadgen::config::DispatchConfig;
use proxy_loadgen::{
    Destination, Dispatcher, ErrorKind, HttpTransport, InMemorySink, Transport, TransportError,
    TransportRequest, TrafficIntent, VendorPool,
};
use reqwest::Method;

#[tokio::test]
async fn test_request_carries_attribution_headers() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_tagged("GET", "/get", "vendor-a", "dc-east", 200, "hello world", 1)
        .await;

    let transport = fixture.transport("vendor-a", ("X-API-Key", "secret"));
    let pool = VendorPool::new("vendor-a", "dc-east", 2);
    let intent = fixture.intent(1, "vendor-a", "dc-east", "/get");
    let resp = transport
        .execute(&TransportRequest::for_attempt(&intent, &pool, 0))
        .await
        .unwrap();

    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.bytes_received, "hello world".len() as u64);
    assert_eq!(resp.bytes_sent, 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_vendor_auth_header_is_sent() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("GET", "/status/200")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .create_async()
            .await
    };

    let transport = fixture.transport("vendor-a", ("X-API-Key", "secret"));
    let pool = VendorPool::new("vendor-a", "dc-east", 2);
    let intent = fixture.intent(1, "vendor-a", "dc-east", "/status/200");
    transport
        .execute(&TransportRequest::for_attempt(&intent, &pool, 0))
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_pattern_headers_travel_with_vendor_auth() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("GET", "/headers")
            .match_header("x-test-pattern", "burst")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .create_async()
            .await
    };

    let mut extra = reqwest::header::HeaderMap::new();
    extra.insert("x-test-pattern", reqwest::header::HeaderValue::from_static("burst"));
    let transport = fixture.transport("vendor-a", ("X-API-Key", "secret"));
    let pool = VendorPool::new("vendor-a", "dc-east", 2);
    let intent = fixture
        .intent(1, "vendor-a", "dc-east", "/headers")
        .with_headers(Arc::new(extra));
    let resp = transport
        .execute(&TransportRequest::for_attempt(&intent, &pool, 0))
        .await
        .unwrap();

    assert_eq!(resp.status_code, 200);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_sends_sized_json_payload() {
    let fixture = MockServerFixture::new().await;
    let mock = {
        let mut server = fixture.server.lock().await;
        server
            .mock("POST", "/post")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(r#"^\{"data":"[A-Za-z0-9]+"\}$"#.to_string()))
            .with_status(201)
            .create_async()
            .await
    };

    let transport = fixture.transport("vendor-b", ("Authorization", "Bearer t"));
    let pool = VendorPool::new("vendor-b", "resi", 1);
    let intent = fixture
        .intent(2, "vendor-b", "resi", "/post")
        .with_method(Method::POST)
        .with_payload_size(64);
    let resp = transport
        .execute(&TransportRequest::for_attempt(&intent, &pool, 0))
        .await
        .unwrap();

    assert_eq!(resp.status_code, 201);
    assert_eq!(resp.bytes_sent, 64);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_tagged("GET", "/status/503", "vendor-a", "dc-east", 503, "", 1)
        .await;

    let transport = fixture.transport("vendor-a", ("X-API-Key", "secret"));
    let pool = VendorPool::new("vendor-a", "dc-east", 2);
    let intent = fixture.intent(1, "vendor-a", "dc-east", "/status/503");
    let resp = transport
        .execute(&TransportRequest::for_attempt(&intent, &pool, 0))
        .await
        .unwrap();

    assert_eq!(resp.status_code, 503);
}

#[tokio::test]
async fn test_refused_connection_is_connect_error() {
    let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
    let pool = VendorPool::new("vendor-a", "dc-east", 1);
    let destination = Arc::new(Destination::new("http://127.0.0.1:1").unwrap());
    let intent = TrafficIntent::new(1, destination, "vendor-a", "dc-east");

    let err = transport
        .execute(&TransportRequest::for_attempt(&intent, &pool, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Connect(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_dispatcher_retries_against_live_server() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_tagged("GET", "/unstable", "vendor-a", "dc-east", 503, "busy", 4)
        .await;

    let sink = Arc::new(InMemorySink::new());
    let transport = Arc::new(fixture.transport("vendor-a", ("X-API-Key", "secret")));
    let dispatcher = Dispatcher::builder(registry(&[("vendor-a", "dc-east", 2, 1.0)]), transport)
        .with_dispatch_config(DispatchConfig {
            max_retries: 3,
            base_delay_ms: 1,
            max_backoff_ms: 5,
            ..Default::default()
        })
        .with_sink(sink.clone())
        .build();

    let report = dispatcher
        .run(vec![fixture.intent(9, "vendor-a", "dc-east", "/unstable")])
        .await;

    assert_eq!(report.attempts, 4);
    assert_eq!(report.failed_terminal, 1);
    let outcome = &sink.outcomes()[0];
    assert_eq!(outcome.status_code(), Some(503));
    assert_eq!(outcome.error_kind(), Some(ErrorKind::RetryableStatus));
    assert_eq!(outcome.bytes_received(), 4);
    assert_eq!(outcome.destination_host(), "127.0.0.1");
    mock.assert_async().await;
}
