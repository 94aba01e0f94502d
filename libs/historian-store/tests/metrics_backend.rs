//! MetricsBackend against a mocked HTTP endpoint

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use historian_model::{DataPoint, Location, Order, TagValue, ValueType};
use historian_store::{MetricsBackend, MetricsConfig, RangeQuery, StorageBackend, StoreError};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> MetricsBackend {
    MetricsBackend::new(MetricsConfig {
        put_url: format!("{}/api/put", server.uri()),
        get_url: format!("{}/api/v1/query_range", server.uri()),
        boundary_lookback_ms: 60_000,
        timeout_ms: 2_000,
    })
    .unwrap()
}

fn location() -> Location {
    Location::new("pump_1").unwrap()
}

#[tokio::test]
async fn test_write_posts_millisecond_samples_without_nulls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/put"))
        .and(body_json(json!([
            {"metric": "pump_1", "value": 1.5, "timestamp": 1_000},
            {"metric": "pump_1", "value": 2.5, "timestamp": 3_000}
        ])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let written = backend(&server)
        .write(
            &location(),
            ValueType::Double,
            &[
                DataPoint::good(1.5, 1_000_000),
                DataPoint::null(2_000_000),
                DataPoint::good(2.5, 3_000_000),
            ],
            false,
        )
        .await
        .unwrap();
    assert_eq!(written, 2);
}

#[tokio::test]
async fn test_write_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/put"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = backend(&server)
        .write(
            &location(),
            ValueType::Double,
            &[DataPoint::good(1.0, 1_000_000)],
            false,
        )
        .await;
    assert!(matches!(result, Err(StoreError::Http(_))));
}

#[tokio::test]
async fn test_range_read_cuts_boundaries_client_side() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .and(query_param("query", "pump_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [{
                    "metric": {"__name__": "pump_1"},
                    "values": [[0.5, "5"], [1.0, "10"], [2.0, "20"], [3.0, "30"], [4.0, "40"]]
                }]
            }
        })))
        .mount(&server)
        .await;

    let query = RangeQuery {
        start: Some(1_500_000),
        finish: Some(2_500_000),
        one_before: true,
        one_after: true,
        ..RangeQuery::default()
    };
    let rows = backend(&server)
        .read_range(&location(), ValueType::Int, &query)
        .await
        .unwrap();

    let stamps: Vec<i64> = rows.iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![1_000_000, 2_000_000, 3_000_000]);
    assert_eq!(rows[1].value, Some(TagValue::Int(20)));
}

#[tokio::test]
async fn test_latest_row_read() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"result": [{"values": [[1.0, "1.25"], [2.0, "2.5"]]}]}
        })))
        .mount(&server)
        .await;

    let query = RangeQuery {
        finish: Some(10_000_000),
        order: Order::Desc,
        limit: Some(1),
        ..RangeQuery::default()
    };
    let rows = backend(&server)
        .read_range(&location(), ValueType::Double, &query)
        .await
        .unwrap();
    assert_eq!(rows, vec![DataPoint::new(Some(TagValue::Double(2.5)), 2_000_000, None)]);
}

#[tokio::test]
async fn test_snapshot_read_sends_lookback_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .and(query_param("start", "40"))
        .and(query_param("end", "160"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"result": [{"values": [[45.0, "7"]]}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Latest row at or before finish plus the one after it
    let query = RangeQuery {
        finish: Some(100_000_000),
        order: Order::Desc,
        limit: Some(1),
        one_after: true,
        ..RangeQuery::default()
    };
    let rows = backend(&server)
        .read_range(&location(), ValueType::Int, &query)
        .await
        .unwrap();
    assert_eq!(rows, vec![DataPoint::new(Some(TagValue::Int(7)), 45_000_000, None)]);
}

#[tokio::test]
async fn test_query_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query_range"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "error",
            "error": "bad query"
        })))
        .mount(&server)
        .await;

    let result = backend(&server)
        .read_range(&location(), ValueType::Double, &RangeQuery::default())
        .await;
    assert!(matches!(result, Err(StoreError::InvalidData(msg)) if msg.contains("bad query")));
}
