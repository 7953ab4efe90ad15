use fixtures::*;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::B256;
use relay_core::error::RelayError;
use relay_executors::polling::{
    BackoffConfig, HttpStatusChecker, PollingManager, PollingOptions, RelayerResponse,
    StatusChecker,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn hash_hex(byte: u8) -> String {
    B256::repeat_byte(byte).to_string()
}

async fn checker_for(mock_server: &MockServer) -> HttpStatusChecker {
    HttpStatusChecker::new(&format!("{}/status", mock_server.uri())).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn posts_status_check_and_decodes_confirmation() {
    setup_tracing();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/status"))
        .and(body_json(json!({ "type": "status_check", "operationId": "op-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "confirmed",
            "hash": hash_hex(0xaa),
            "receipt": { "status": "success" },
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = checker_for(&mock_server).await.check_status("op-1").await.unwrap();

    assert_eq!(
        response,
        RelayerResponse::Confirmed {
            hash: B256::repeat_byte(0xaa),
            receipt: Some(json!({ "status": "success" })),
        }
    );
}

#[tokio::test]
async fn pending_response_carries_queue_position() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "pending",
            "stage": "queued",
            "queuePosition": 4,
        })))
        .mount(&mock_server)
        .await;

    let response = checker_for(&mock_server).await.check_status("op-q").await.unwrap();
    assert!(matches!(
        response,
        RelayerResponse::Pending { queue_position: Some(4), .. }
    ));
}

#[tokio::test]
async fn server_error_is_a_transient_relayer_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let err = checker_for(&mock_server).await.check_status("op-1").await.unwrap_err();

    match &err {
        RelayError::Relayer { status, body, .. } => {
            assert_eq!(*status, Some(503));
            assert_eq!(body.as_deref(), Some("overloaded"));
        }
        other => panic!("expected relayer error, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_error_is_not_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "unknown operation" })))
        .mount(&mock_server)
        .await;

    let err = checker_for(&mock_server).await.check_status("op-1").await.unwrap_err();

    assert!(matches!(err, RelayError::Relayer { status: Some(400), .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_a_relayer_error_with_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&mock_server)
        .await;

    let err = checker_for(&mock_server).await.check_status("op-1").await.unwrap_err();

    assert!(matches!(err, RelayError::Relayer { status: Some(200), .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    // Bind then drop to get a local port nobody listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let checker = HttpStatusChecker::new(&format!("http://{addr}/status")).unwrap();

    let err = checker.check_status("op-1").await.unwrap_err();

    assert!(matches!(err, RelayError::Network { .. }), "got {err:?}");
    assert!(err.is_transient());
}

#[test]
fn rejects_an_invalid_url() {
    assert!(matches!(
        HttpStatusChecker::new("not a url"),
        Err(RelayError::Relayer { status: None, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn polling_rides_out_a_server_error_over_http() {
    setup_tracing();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "confirmed",
            "hash": hash_hex(0x42),
        })))
        .mount(&mock_server)
        .await;

    let manager = PollingManager::new(Arc::new(checker_for(&mock_server).await));
    let options = PollingOptions::default().with_backoff(BackoffConfig {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(20),
        multiplier: 1.5,
        timeout: Duration::from_secs(5),
    });

    let outcome = manager.start_polling("op-http", options).await.unwrap();

    assert_eq!(outcome.hash, B256::repeat_byte(0x42));
    assert!(outcome.receipt.is_none());
}
