use std::time::Duration;

use kline_core::Interval;
use kline_engine::{FailureKind, FetchRequest, FetchSettings, Fetcher, ReqwestFetcher};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TWO_ROWS: &str = r#"[
    [1700000000000,"37000.01","37100.00","36950.50","37050.25","12.345",1700000059999,"457000.1",120,"6.1","225000.0","0"],
    [1700000060000,"37050.25","37060.00","37000.00","37010.00","3.2",1700000119999,"118000.5",45,"1.0","37000.0","0"]
]"#;

fn request(server: &MockServer, interval: Interval) -> FetchRequest {
    FetchRequest {
        base_url: Some(server.uri()),
        symbol: "BTCUSDT".into(),
        interval,
        limit: 1000,
    }
}

fn fetcher() -> ReqwestFetcher {
    ReqwestFetcher::new(FetchSettings::default()).expect("client")
}

#[tokio::test]
async fn fetcher_decodes_rows_and_sends_query() {
    kline_logging::initialize_for_tests();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("interval", "1h"))
        .and(query_param("limit", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TWO_ROWS, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let klines = fetcher()
        .fetch(&request(&server, Interval::H1))
        .await
        .expect("fetch ok");

    assert_eq!(klines.len(), 2);
    assert_eq!(klines[0].open, "37000.01");
    assert_eq!(klines[0].trades, Some(120));
    assert_eq!(klines[1].close_time, 1_700_000_119_999);
}

#[tokio::test]
async fn rate_limit_is_retryable_with_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&request(&server, Interval::M5))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(429));
    assert!(err.is_retryable());
    assert_eq!(err.retry_hint(), Some(Duration::from_secs(5)));
}

#[tokio::test]
async fn ip_ban_status_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(418).insert_header("Retry-After", "2500"))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&request(&server, Interval::M5))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.retry_hint(), Some(Duration::from_millis(2500)));
}

#[tokio::test]
async fn server_error_is_retryable_without_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&request(&server, Interval::M1))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.retry_hint(), None);
}

#[tokio::test]
async fn forbidden_is_fatal_and_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string(r#"{"code":-2015,"msg":"Invalid API-key, IP, or permissions."}"#),
        )
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&request(&server, Interval::M15))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(403));
    assert!(!err.is_retryable());
    assert!(err.message.starts_with("http status 403: "));
    assert!(err.message.contains("Invalid API-key"));
}

#[tokio::test]
async fn huge_error_body_is_cut_to_an_excerpt() {
    let server = MockServer::start().await;
    let body = format!("maintenance {}", "x".repeat(8 * 1024 * 1024));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string(body))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&request(&server, Interval::M15))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(503));
    assert!(err.is_retryable());
    assert!(err.message.starts_with("http status 503: maintenance x"));
    assert!(err.message.ends_with('…'));
    assert!(err.message.chars().count() < 400);
}

#[tokio::test]
async fn malformed_body_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>maintenance</html>", "text/html"))
        .mount(&server)
        .await;

    let err = fetcher()
        .fetch(&request(&server, Interval::D1))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::MalformedBody);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn fetcher_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_raw(TWO_ROWS, "application/json"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings).expect("client");

    let err = fetcher
        .fetch(&request(&server, Interval::W1))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(TWO_ROWS, "application/json"))
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 16,
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings).expect("client");

    let err = fetcher
        .fetch(&request(&server, Interval::Mo1))
        .await
        .unwrap_err();
    assert!(matches!(err.kind, FailureKind::TooLarge { max_bytes: 16, .. }));
    assert!(err.is_retryable());
}
