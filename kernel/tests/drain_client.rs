//! Drain client against a mocked collector endpoint.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailcatch_kernel::drain::{DrainClient, DrainError, FetchFailure};
use mailcatch_kernel::snapshot::SnapshotWriter;

const SECRET: &str = "s3cret";

fn entry(email: &str) -> serde_json::Value {
    json!({
        "email": email,
        "timestamp": Utc::now(),
        "id": uuid::Uuid::now_v7(),
    })
}

fn client(server: &MockServer, backup_dir: &std::path::Path) -> DrainClient {
    DrainClient::new(
        &server.uri(),
        SECRET,
        SnapshotWriter::new(backup_dir),
        Duration::from_secs(5),
    )
    .unwrap()
}

async fn mount_drain(server: &MockServer, emails: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path("/api/emails"))
        .and(query_param("secret", SECRET))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": emails.len(),
            "emails": emails,
            "cleared": true,
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn drained_batches_become_chained_snapshots() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    mount_drain(&server, vec![entry("a@x.com"), entry("b@x.com")]).await;
    let first = client.run_once().await.unwrap();
    assert_eq!(first.fetched, 2);
    let first_snapshot = first.snapshot.unwrap();
    assert_eq!(first_snapshot.total_count, 2);
    assert_eq!(first_snapshot.previous_snapshot_name, None);

    mount_drain(&server, vec![entry("c@x.com")]).await;
    let second = client.run_once().await.unwrap();
    let second_snapshot = second.snapshot.unwrap();
    assert_eq!(second_snapshot.newly_added_count, 1);
    assert_eq!(second_snapshot.total_count, 3);
    assert_eq!(
        second_snapshot.previous_snapshot_name.as_deref(),
        Some(first_snapshot.name.as_str())
    );

    let (_, latest) = client.writer().latest().unwrap().unwrap();
    let addresses: Vec<_> = latest.submissions.iter().map(|s| s.address.as_str()).collect();
    assert_eq!(addresses, ["a@x.com", "b@x.com", "c@x.com"]);
}

#[tokio::test]
async fn empty_drain_writes_no_snapshot() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let client = client(&server, dir.path());

    mount_drain(&server, vec![]).await;
    let summary = client.run_once().await.unwrap();

    assert!(summary.is_empty());
    assert_eq!(summary.fetched, 0);
    assert!(client.writer().list().unwrap().is_empty());
}

#[tokio::test]
async fn server_error_is_fetch_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/emails"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": "Failed to retrieve emails"
        })))
        .mount(&server)
        .await;

    let err = client(&server, dir.path()).run_once().await.unwrap_err();
    match err {
        DrainError::Fetch(FetchFailure::Status { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("Failed to retrieve emails"));
        }
        other => panic!("expected status failure, got {other:?}"),
    }
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn garbage_body_is_fetch_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client(&server, dir.path()).run_once().await.unwrap_err();
    assert!(matches!(err, DrainError::Fetch(FetchFailure::Decode(_))));
}

#[tokio::test]
async fn uncleared_response_is_not_snapshotted() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "emails": [entry("a@x.com")],
            "cleared": false,
        })))
        .mount(&server)
        .await;

    let client = client(&server, dir.path());
    let err = client.run_once().await.unwrap_err();
    assert!(matches!(err, DrainError::Fetch(FetchFailure::NotCleared)));
    assert!(client.writer().list().unwrap().is_empty());
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/emails"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "count": 0, "emails": [], "cleared": true }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = DrainClient::new(
        &server.uri(),
        SECRET,
        SnapshotWriter::new(dir.path()),
        Duration::from_millis(200),
    )
    .unwrap();

    let err = client.run_once().await.unwrap_err();
    assert!(matches!(err, DrainError::Fetch(FetchFailure::Transport(_))));
}

#[tokio::test]
async fn overlapping_run_is_refused() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/emails"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "count": 0, "emails": [], "cleared": true }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = Arc::new(client(&server, dir.path()));
    let slow = tokio::spawn({
        let client = client.clone();
        async move { client.run_once().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(client.run_once().await, Err(DrainError::Busy)));

    assert!(slow.await.unwrap().is_ok());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_snapshot_write_is_carried_to_next_run() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let backup_dir = dir.path().join("backups");
    // A file where the backup directory should be makes the write fail.
    std::fs::write(&backup_dir, b"").unwrap();

    let client = client(&server, &backup_dir);

    mount_drain(&server, vec![entry("a@x.com")]).await;
    let err = client.run_once().await.unwrap_err();
    assert!(matches!(err, DrainError::Storage(_)));
    assert_eq!(client.pending().await, 1);

    std::fs::remove_file(&backup_dir).unwrap();

    mount_drain(&server, vec![entry("b@x.com")]).await;
    let summary = client.run_once().await.unwrap();
    assert_eq!(summary.carried_over, 1);
    assert_eq!(summary.fetched, 1);
    assert_eq!(client.pending().await, 0);

    let (_, latest) = client.writer().latest().unwrap().unwrap();
    let addresses: Vec<_> = latest.submissions.iter().map(|s| s.address.as_str()).collect();
    assert_eq!(addresses, ["a@x.com", "b@x.com"]);
}
