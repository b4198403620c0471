//! Blackbox tests running complete load tests against a mock endpoint.
//!
//! These tests assert that every request of a run is issued, classified and summarized, and that
//! batches never exceed the configured concurrency.

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::time::Duration;

use anyhow::Result;
use loadtest::results::RequestStatus;
use loadtest::{HttpRemote, LoadTest, LoadTestBuilder, ResultSet};
use loadtest_test::server::{Reply, TestServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn builder(url: &str) -> Result<LoadTestBuilder> {
    Ok(LoadTest::builder()
        .url(url)?
        .k_range(2, 2)?
        .pacing(Duration::ZERO))
}

async fn run(builder: LoadTestBuilder) -> Result<ResultSet> {
    let load_test = builder.build()?;
    let remote = HttpRemote::new(load_test.config())?;
    Ok(loadtest::run(remote, load_test).await)
}

#[tokio::test]
async fn test_all_successful() -> Result<()> {
    loadtest_test::tracing::init();
    let server = TestServer::new(Reply::ok("{}")).await;

    let results = run(builder(&server.url("/"))?.counts(2, 0, 0)?.concurrency(1)?).await?;

    let summary = results.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.success_rate, 100.0);
    assert!(summary.max_latency >= summary.min_latency);
    assert!(results.finished_at().is_some());

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert_eq!(request.content_type.as_deref(), Some("application/json"));
        assert_eq!(request.body["k_clusters"], 2);

        let image_key = request.body["image_key"].as_str().unwrap();
        assert!(image_key.starts_with("small_"), "{image_key}");
        assert!(image_key.ends_with(".jpg"), "{image_key}");
    }

    Ok(())
}

#[tokio::test]
async fn test_http_errors() -> Result<()> {
    let server = TestServer::new(Reply::status(500, "internal error")).await;

    let results = run(builder(&server.url("/"))?.counts(2, 0, 0)?.concurrency(1)?).await?;

    let summary = results.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.successful, 0);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(summary.avg_latency, Duration::ZERO);

    for record in results.failures() {
        assert_eq!(record.status, RequestStatus::HttpError);
        assert_eq!(record.http_status, Some(500));
        assert!(record.error.as_deref().unwrap().contains("internal error"));
    }

    Ok(())
}

#[tokio::test]
async fn test_malformed_response() -> Result<()> {
    let server = TestServer::new(Reply::ok("this is not json")).await;

    let results = run(builder(&server.url("/"))?.counts(1, 1, 0)?.concurrency(2)?).await?;

    assert_eq!(results.successes().len(), 0);
    assert_eq!(results.failures().len(), 2);
    for record in results.failures() {
        assert_eq!(record.status, RequestStatus::MalformedResponse);
        assert_eq!(record.http_status, Some(200));
    }

    Ok(())
}

#[tokio::test]
async fn test_timeout() -> Result<()> {
    let server = TestServer::new(Reply::ok("{}").after(Duration::from_secs(5))).await;

    let results = run(
        builder(&server.url("/"))?
            .counts(1, 0, 0)?
            .request_timeout(Duration::from_millis(200))?,
    )
    .await?;

    assert_eq!(results.len(), 1);
    let record = &results.failures()[0];
    assert_eq!(record.status, RequestStatus::Timeout);
    assert!(record.error.is_some());

    Ok(())
}

#[tokio::test]
async fn test_unreachable_endpoint() -> Result<()> {
    // Reserve a free port and release it again, so nothing is listening there.
    let port = TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let url = format!("http://127.0.0.1:{port}/");

    let results = run(builder(&url)?.counts(2, 1, 0)?.concurrency(2)?).await?;

    let summary = results.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(
        summary.failures_by_status,
        BTreeMap::from([(RequestStatus::TransportException, 3)])
    );

    Ok(())
}

#[tokio::test]
async fn test_zero_counts_issue_one_request() -> Result<()> {
    let server = TestServer::new(Reply::ok("{}")).await;

    let results = run(builder(&server.url("/"))?.counts(0, 0, 0)?).await?;

    assert_eq!(results.len(), 1);
    assert_eq!(server.requests().len(), 1);
    assert_eq!(results.successes()[0].category, "small");

    Ok(())
}

#[tokio::test]
async fn test_batches_respect_concurrency() -> Result<()> {
    let server = TestServer::new(Reply::ok("{}").after(Duration::from_millis(100))).await;

    let results = run(builder(&server.url("/"))?.counts(4, 3, 2)?.concurrency(3)?).await?;

    assert_eq!(results.len(), 9);
    assert_eq!(server.requests().len(), 9);
    assert!(server.peak_in_flight() <= 3);
    assert!(server.peak_in_flight() > 1);

    let mut batches = BTreeMap::<usize, usize>::new();
    for record in results.records() {
        *batches.entry(record.batch).or_default() += 1;
    }
    assert_eq!(batches, BTreeMap::from([(0, 3), (1, 3), (2, 3)]));

    let summary = results.summary();
    assert_eq!(
        summary.requests_by_category,
        BTreeMap::from([
            ("large".to_owned(), 2),
            ("medium".to_owned(), 3),
            ("small".to_owned(), 4)
        ])
    );

    Ok(())
}

#[tokio::test]
async fn test_batches_do_not_overlap() -> Result<()> {
    let server = TestServer::new(Reply::ok("{}").after(Duration::from_millis(50))).await;

    let results = run(
        builder(&server.url("/"))?
            .counts(3, 2, 0)?
            .concurrency(2)?
            .pacing(Duration::from_millis(20)),
    )
    .await?;

    let records: Vec<_> = results.records().collect();
    for record in &records {
        let previous_batch_end = records
            .iter()
            .filter(|r| r.batch + 1 == record.batch)
            .map(|r| r.issued_at + r.latency)
            .max();

        if let Some(end) = previous_batch_end {
            assert!(record.issued_at >= end);
        }
    }

    // Three batches with two pauses in between.
    assert!(results.duration() >= Duration::from_millis(40));

    Ok(())
}

#[tokio::test]
async fn test_mixed_outcomes() -> Result<()> {
    let server = TestServer::with_responder(|body| {
        let image_key = body["image_key"].as_str().unwrap_or_default();
        if image_key.starts_with("large_") {
            Reply::status(503, "overloaded")
        } else {
            Reply::ok(r#"{"clusters": [[0, 0, 0]]}"#)
        }
    })
    .await;

    let results = run(builder(&server.url("/process"))?.counts(3, 1, 2)?.concurrency(4)?).await?;

    let summary = results.summary();
    assert_eq!(summary.total, 6);
    assert_eq!(summary.successful, 4);
    assert_eq!(summary.failed, 2);
    assert!((summary.success_rate - 400.0 / 6.0).abs() < 1e-9);

    assert!(results.successes().iter().all(|r| r.category != "large"));
    assert!(results.failures().iter().all(|r| r.category == "large"));

    Ok(())
}

#[tokio::test]
async fn test_configuration_errors_prevent_run() -> Result<()> {
    let server = TestServer::new(Reply::ok("{}")).await;

    assert!(builder(&server.url("/"))?.counts(-1, 0, 0).is_err());
    assert!(LoadTest::builder().counts(1, 0, 0)?.build().is_err());
    assert!(server.requests().is_empty());

    Ok(())
}

/// Accepts a single connection, reads the request and replies with a truncated response.
async fn serve_truncated_once(listener: tokio::net::TcpListener, status_line: &str) -> Result<()> {
    let (mut stream, _) = listener.accept().await?;

    let mut request = Vec::new();
    let mut buf = [0; 1024];
    let header_end = loop {
        let read = stream.read(&mut buf).await?;
        anyhow::ensure!(read > 0, "connection closed before request headers");
        request.extend_from_slice(&buf[..read]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length: usize = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        let read = stream.read(&mut buf).await?;
        anyhow::ensure!(read > 0, "connection closed before request body");
        request.extend_from_slice(&buf[..read]);
    }

    // Announce more body than is actually sent, then hang up.
    let response = format!("{status_line}\r\nContent-Length: 100\r\n\r\noops");
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;

    Ok(())
}

#[tokio::test]
async fn test_http_error_with_truncated_body() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/", listener.local_addr()?);
    let server = tokio::spawn(serve_truncated_once(
        listener,
        "HTTP/1.1 500 Internal Server Error",
    ));

    let results = run(builder(&url)?.counts(1, 0, 0)?).await?;
    server.await??;

    assert_eq!(results.len(), 1);
    let record = &results.failures()[0];
    assert_eq!(record.status, RequestStatus::HttpError);
    assert_eq!(record.http_status, Some(500));
    assert!(record.error.is_some());

    Ok(())
}

#[tokio::test]
async fn test_truncated_ok_body_is_not_an_http_error() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/", listener.local_addr()?);
    let server = tokio::spawn(serve_truncated_once(listener, "HTTP/1.1 200 OK"));

    let results = run(builder(&url)?.counts(1, 0, 0)?).await?;
    server.await??;

    let record = &results.failures()[0];
    assert_eq!(record.status, RequestStatus::TransportException);
    assert_eq!(record.http_status, Some(200));

    Ok(())
}
