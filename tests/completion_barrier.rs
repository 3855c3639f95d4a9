//! Completion barrier semantics: the barrier returns only once every
//! watched request is terminal, regardless of response arrival order, and
//! its verdict is all-or-nothing while still draining everything.

use batchswarm::shared::ChannelTransport;
use batchswarm::{Manager, Outcome, RequestId};

#[tokio::test]
async fn barrier_waits_for_every_request_regardless_of_order() {
    let manager = Manager::new();
    let (transport, mut endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    let mut ids = Vec::new();
    for n in 0..8 {
        let blob_id = format!("blob-{n}");
        ids.push(session.blob_create(&blob_id, 16, None).await.unwrap());
    }
    assert_eq!(session.pending_request_count(), 8);

    // Answer from a background task in a scrambled order while the
    // barrier is already suspended.
    let replier = tokio::spawn(async move {
        let mut requests = Vec::new();
        for _ in 0..8 {
            requests.push(endpoint.next_request().await.unwrap());
        }
        for index in [5usize, 0, 7, 2, 6, 1, 4, 3] {
            endpoint.reply(requests[index].id, Outcome::ok());
            tokio::task::yield_now().await;
        }
        endpoint
    });

    assert!(session.wait_all().await.unwrap());
    assert_eq!(session.pending_request_count(), 0);
    for id in ids {
        // Inspected and discarded by the barrier.
        assert!(session.request_result(id).is_none());
    }
    drop(replier.await.unwrap());
}

#[tokio::test]
async fn single_failure_flips_the_aggregate() {
    let manager = Manager::new();
    let (transport, mut endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(session.blob_create(&format!("b{n}"), 16, None).await.unwrap());
    }
    for _ in 0..5 {
        endpoint.next_request().await.unwrap();
    }
    for (index, id) in ids.iter().enumerate() {
        if index == 2 {
            endpoint.reply(*id, Outcome::Error {
                message: "not today".to_string(),
            });
        } else {
            endpoint.reply(*id, Outcome::ok());
        }
    }

    assert!(!session.wait_all().await.unwrap());
    // Every record drained despite the failure; nothing pending for a
    // later barrier to misattribute.
    assert_eq!(session.pending_request_count(), 0);

    // A subsequent barrier over new work is unaffected.
    let id = session.blob_create("fresh", 16, None).await.unwrap();
    endpoint.next_request().await.unwrap();
    endpoint.reply(id, Outcome::ok());
    assert!(session.wait_all().await.unwrap());
}

#[tokio::test]
async fn responses_already_buffered_resolve_without_suspending() {
    let manager = Manager::new();
    let (transport, mut endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    let id_a = session.blob_create("a", 16, None).await.unwrap();
    let id_b = session.blob_create("b", 16, None).await.unwrap();
    endpoint.next_request().await.unwrap();
    endpoint.next_request().await.unwrap();
    endpoint.reply(id_b, Outcome::ok());
    endpoint.reply(id_a, Outcome::ok());

    // Both replies are sitting in the channel; the barrier's first
    // non-blocking pass drains them.
    assert!(session.wait_all().await.unwrap());
}

#[tokio::test]
async fn late_reply_for_a_drained_request_is_ignored() {
    let manager = Manager::new();
    let (transport, mut endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    let id = session.blob_create("a", 16, None).await.unwrap();
    endpoint.next_request().await.unwrap();
    endpoint.reply(id, Outcome::ok());
    assert!(session.wait_all().await.unwrap());

    // The worker repeats itself; the identifier no longer exists.
    endpoint.reply(id, Outcome::ok());
    session.poll_responses().await.unwrap();
    assert_eq!(session.pending_request_count(), 0);
}

#[tokio::test]
async fn identifiers_are_reusable_after_the_barrier_drains_them() {
    let manager = Manager::new();
    let (transport, mut endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    // Issue and drain many batches; the registry never grows and request
    // identifiers stay attributable within each batch.
    for round in 0..3 {
        let blob_id = format!("blob-{round}");
        let id = session.blob_create(&blob_id, 16, None).await.unwrap();
        let request = endpoint.next_request().await.unwrap();
        assert_eq!(request.id, id);
        endpoint.reply(id, Outcome::ok());
        assert!(session.wait_all().await.unwrap());
        assert!(session.request_result(id).is_none());
    }
}

#[tokio::test]
async fn unknown_identifiers_never_fault_the_barrier() {
    let manager = Manager::new();
    let (transport, mut endpoint) = ChannelTransport::pair("w1");
    let mut session = manager.session("w1", transport);

    let id = session.blob_create("a", 16, None).await.unwrap();
    endpoint.next_request().await.unwrap();
    // A reply for a request that was never issued arrives first.
    endpoint.reply(RequestId(40_000), Outcome::ok());
    endpoint.reply(id, Outcome::ok());

    assert!(session.wait_all().await.unwrap());
}
