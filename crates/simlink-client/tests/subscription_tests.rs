//! Subscription tests: filters, bounded delivery and teardown.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{client, start_available, within};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use simlink_client::SubscriptionOptions;
use simlink_transport_traits::{Envelope, MessageKind};

#[tokio::test(start_paused = true)]
async fn test_predicate_subscription_receives_only_matching_event() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let mut only_42 = client
        .subscribe_filtered(SubscriptionOptions::new().named("only-42"), |env| {
            env.event_id() == Some(42)
        })
        .unwrap();
    let mut everything = client
        .subscribe_kinds(SubscriptionOptions::new(), [MessageKind::Event])
        .unwrap();

    feed.push_all([1, 2, 3, 42].map(|id| Envelope::event(id, 0)))
        .unwrap();

    for expected in [1, 2, 3, 42] {
        let env = within(everything.recv()).await.unwrap();
        assert_eq!(env.event_id(), Some(expected));
    }
    let env = only_42.try_recv().unwrap();
    assert_eq!(env.event_id(), Some(42));
    assert!(only_42.try_recv().is_none());
    assert_eq!(only_42.name(), "only-42");

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_drops_and_reports() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let drops = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drops);
    let slow = client
        .subscribe_kinds(
            SubscriptionOptions::new()
                .named("slow")
                .with_capacity(2)
                .on_drop(move |name| {
                    assert_eq!(name, "slow");
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            [MessageKind::Event],
        )
        .unwrap();
    let mut fast = client
        .subscribe_kinds(SubscriptionOptions::new(), [MessageKind::Event])
        .unwrap();

    feed.push_all((0..10).map(|id| Envelope::event(id, 0)))
        .unwrap();
    for _ in 0..10 {
        within(fast.recv()).await.unwrap();
    }

    assert_eq!(slow.queued(), 2);
    assert_eq!(slow.dropped(), 8);
    assert_eq!(drops.load(Ordering::SeqCst), 8);
    assert_eq!(client.metrics().subscription_drops, 8);
    assert!(!slow.is_closed());

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_oldest_items_survive_a_full_queue() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let mut slow = client
        .subscribe_kinds(
            SubscriptionOptions::new().with_capacity(2),
            [MessageKind::Event],
        )
        .unwrap();
    let mut fast = client
        .subscribe_kinds(SubscriptionOptions::new(), [MessageKind::Event])
        .unwrap();

    feed.push_all((10..15).map(|id| Envelope::event(id, 0)))
        .unwrap();
    for _ in 0..5 {
        within(fast.recv()).await.unwrap();
    }

    let first = slow.try_recv().unwrap();
    let second = slow.try_recv().unwrap();
    assert_eq!((first.event_id(), second.event_id()), (Some(10), Some(11)));
    assert!(slow.try_recv().is_none());

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_twice_is_harmless() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let sub = client.subscribe(SubscriptionOptions::new()).unwrap();
    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    assert!(sub.is_closed());
    within(sub.done()).await;
    drop(sub);

    // Tracking was released exactly once, so shutdown does not wait
    within(client.shutdown()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_predicate_rejects() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let mut picky = client
        .subscribe_filtered(SubscriptionOptions::new(), |env| {
            assert_ne!(env.event_id(), Some(13), "unlucky");
            env.kind == MessageKind::Event
        })
        .unwrap();

    feed.push_all([12, 13, 14].map(|id| Envelope::event(id, 0)))
        .unwrap();

    let first = within(picky.recv()).await.unwrap();
    let second = within(picky.recv()).await.unwrap();
    assert_eq!(first.event_id(), Some(12));
    assert_eq!(second.event_id(), Some(14));
    assert_eq!(client.metrics().predicate_panics, 1);

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subscription_is_a_stream() {
    let (client, feed) = client();
    start_available(&client, &feed).await;

    let events = client
        .subscribe_kinds(SubscriptionOptions::new(), [MessageKind::Event])
        .unwrap();
    feed.push_all((1..=3).map(|id| Envelope::event(id, id)))
        .unwrap();

    let data: Vec<u32> = within(
        events
            .take(3)
            .map(|env| match &env.payload {
                simlink_transport_traits::Payload::Event(event) => event.data,
                _ => 0,
            })
            .collect(),
    )
    .await;
    assert_eq!(data, vec![1, 2, 3]);

    client.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connection_state_subscription_sees_transitions() {
    let (client, feed) = client();
    let mut states = client
        .subscribe_connection_state(SubscriptionOptions::new())
        .unwrap();
    start_available(&client, &feed).await;

    let mut seen = Vec::new();
    while let Some(change) = states.try_recv() {
        seen.push(change.current);
    }
    assert_eq!(
        seen,
        vec![
            simlink_client::ConnectionState::Connecting,
            simlink_client::ConnectionState::Connected,
            simlink_client::ConnectionState::Available,
        ]
    );
    client.shutdown().await.unwrap();
}
