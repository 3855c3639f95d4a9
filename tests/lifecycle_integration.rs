//! Blob lifecycle integration: the full create -> put -> commit -> get ->
//! delete path against an in-process worker, plus the invariants callers
//! lean on (at most one outstanding request per blob, idempotent delete,
//! exact content round trips).

mod common;

use std::io::Write;

use batchswarm::shared::ChannelTransport;
use batchswarm::{BlobState, Error, Manager};
use common::InProcessWorker;
use pretty_assertions::assert_eq;

fn fixture_file(content: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(content).expect("write fixture");
    file.flush().expect("flush fixture");
    file
}

#[tokio::test]
async fn round_trip_returns_exactly_the_bytes_last_put() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);
    let _worker = InProcessWorker::spawn(endpoint);

    let payload = b"alpha\nbeta\ngamma\n";
    let source = fixture_file(payload);
    let destination = tempfile::NamedTempFile::new().unwrap();

    session.blob_create("data", 1024, None).await.unwrap();
    assert!(session.wait_all().await.unwrap());

    session.blob_put("data", source.path()).await.unwrap();
    assert!(session.wait_all().await.unwrap());
    assert_eq!(session.bytes_sent(), payload.len() as u64);

    session.blob_commit("data").await.unwrap();
    assert!(session.wait_all().await.unwrap());
    assert_eq!(session.blob("data").unwrap().state, BlobState::Committed);

    session.blob_get("data", destination.path()).await.unwrap();
    assert!(session.wait_all().await.unwrap());

    let fetched = std::fs::read(destination.path()).unwrap();
    assert_eq!(fetched, payload);
    assert_eq!(session.bytes_received(), payload.len() as u64);
}

#[tokio::test]
async fn second_put_replaces_staged_content() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);
    let _worker = InProcessWorker::spawn(endpoint);

    let first = fixture_file(b"first\n");
    let second = fixture_file(b"second version\n");
    let destination = tempfile::NamedTempFile::new().unwrap();

    session.blob_create("data", 1024, None).await.unwrap();
    assert!(session.wait_all().await.unwrap());
    session.blob_put("data", first.path()).await.unwrap();
    assert!(session.wait_all().await.unwrap());
    session.blob_put("data", second.path()).await.unwrap();
    assert!(session.wait_all().await.unwrap());
    session.blob_commit("data").await.unwrap();
    assert!(session.wait_all().await.unwrap());
    session.blob_get("data", destination.path()).await.unwrap();
    assert!(session.wait_all().await.unwrap());

    assert_eq!(std::fs::read(destination.path()).unwrap(), b"second version\n");
}

#[tokio::test]
async fn issuing_while_pending_fails_and_leaves_the_request_untouched() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    let first = session.blob_create("b", 16, None).await.unwrap();
    let err = session.blob_create("b", 16, None).await.unwrap_err();
    assert!(matches!(err, Error::RequestPending { .. }));
    assert!(err.is_programming_error());
    assert_eq!(session.pending_request_count(), 1);

    // The in-flight request still resolves normally.
    let _worker = InProcessWorker::spawn(endpoint);
    assert!(session.wait_all().await.unwrap());
    assert!(session.request_result(first).is_none()); // drained after inspection
    assert_eq!(session.blob("b").unwrap().state, BlobState::Created);
}

#[tokio::test]
async fn delete_of_an_absent_blob_is_a_defined_outcome() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);
    let _worker = InProcessWorker::spawn(endpoint);

    // Declared locally, never created on the worker: the delete reaches
    // the worker, which treats it as a no-op success. No programming
    // error either way.
    session.declare_blob("stale").unwrap();
    session.blob_delete("stale").await.unwrap();
    assert!(session.wait_all().await.unwrap());
    assert_eq!(session.blob("stale").unwrap().state, BlobState::Deleted);

    // The settled record can be discarded and the identifier reused.
    session.discard_blob("stale").unwrap();
    session.blob_create("stale", 8, None).await.unwrap();
    assert!(session.wait_all().await.unwrap());
    assert_eq!(session.blob("stale").unwrap().state, BlobState::Created);
}

#[tokio::test]
async fn worker_crash_fails_the_phase_but_not_the_session_state() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);
    let worker = InProcessWorker::spawn(endpoint);

    session.blob_create("survivor", 16, None).await.unwrap();
    assert!(session.wait_all().await.unwrap());

    worker.abort().await;
    // The next phase strands its request; the barrier folds the loss
    // into a failed verdict instead of hanging.
    let issued = session.blob_commit("survivor").await;
    let phase_ok = match issued {
        Ok(_) => session.wait_all().await.unwrap(),
        Err(_) => false, // the send already observed the dead link
    };
    assert!(!phase_ok);
    assert!(!session.is_connected());
    assert_eq!(session.pending_request_count(), 0);
    assert_eq!(session.blob("survivor").unwrap().state, BlobState::Failed);
}

#[tokio::test]
async fn put_rejected_when_capacity_exceeded() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);
    let _worker = InProcessWorker::spawn(endpoint);

    let source = fixture_file(b"this payload is longer than eight bytes\n");

    session.blob_create("small", 8, None).await.unwrap();
    assert!(session.wait_all().await.unwrap());

    session.blob_put("small", source.path()).await.unwrap();
    assert!(!session.wait_all().await.unwrap());

    let blob = session.blob("small").unwrap();
    assert_eq!(blob.state, BlobState::Failed);
    let diagnostic = blob.worker_error().expect("diagnostic retained");
    assert!(diagnostic.to_string().contains("capacity"));
}

#[tokio::test]
async fn phases_short_circuit_on_failure_but_cleanup_proceeds() {
    let manager = Manager::new();
    let (transport, endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);
    let _worker = InProcessWorker::spawn(endpoint);

    // Phase 1: create two blobs, one with an impossible follow-up.
    session.blob_create("good", 64, None).await.unwrap();
    session.blob_create("bad", 4, None).await.unwrap();
    assert!(session.wait_all().await.unwrap());

    // Phase 2: populate; the oversized put fails the phase.
    let good = fixture_file(b"ok\n");
    let oversized = fixture_file(b"far too large for four bytes\n");
    session.blob_put("good", good.path()).await.unwrap();
    session.blob_put("bad", oversized.path()).await.unwrap();
    assert!(!session.wait_all().await.unwrap());

    // Downstream cleanup still runs independently.
    session.blob_delete("good").await.unwrap();
    session.blob_delete("bad").await.unwrap();
    assert!(session.wait_all().await.unwrap());
    assert_eq!(session.blob("good").unwrap().state, BlobState::Deleted);
    assert_eq!(session.blob("bad").unwrap().state, BlobState::Deleted);
}
