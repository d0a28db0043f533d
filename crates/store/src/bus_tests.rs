// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::MemoryStore;
use runq_core::{EventAction, QueueId, WorkItem};
use std::time::Duration;
use tokio::time::timeout;

fn sample_event(instance: &str) -> QueueEvent {
    let item = WorkItem::new(
        QueueId::new("q_abc123def456"),
        "job-1",
        "Title",
        "Co",
        "full_pipeline",
        "auto",
        chrono::Utc::now(),
    );
    QueueEvent {
        action: EventAction::Added,
        item,
        timestamp: chrono::Utc::now(),
        source_instance: InstanceId::new(instance),
    }
}

async fn recv_one(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> QueueEvent {
    timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap()
}

async fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) {
    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
}

#[test]
fn dispatch_reaches_every_subscriber_once() {
    let bus = EventBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    let event = sample_event("aaaaaaaaaaaaaaaa");
    bus.dispatch_local(&event);

    assert_eq!(a.try_recv().unwrap(), event);
    assert_eq!(b.try_recv().unwrap(), event);
    assert!(a.try_recv().is_err());
    assert!(b.try_recv().is_err());
}

#[test]
fn dead_subscriber_is_pruned_and_siblings_still_served() {
    let bus = EventBus::new();
    let dead = bus.subscribe();
    let mut live = bus.subscribe();
    drop(dead);

    let event = sample_event("aaaaaaaaaaaaaaaa");
    bus.dispatch_local(&event);

    assert_eq!(live.try_recv().unwrap(), event);
    assert_eq!(bus.subscriber_count(), 1);
}

#[tokio::test]
async fn listener_forwards_peer_events() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::with_instance(InstanceId::new("bbbbbbbbbbbbbbbb")));
    let mut rx = bus.subscribe();

    let cancel = CancellationToken::new();
    let listener = tokio::spawn(run_listener(Arc::clone(&store), Arc::clone(&bus), cancel.clone()));
    tokio::task::yield_now().await;

    let peer_event = sample_event("aaaaaaaaaaaaaaaa");
    store
        .publish(EVENTS_CHANNEL, &serde_json::to_string(&peer_event).unwrap())
        .await
        .unwrap();

    assert_eq!(recv_one(&mut rx).await, peer_event);

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn listener_drops_own_events() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::with_instance(InstanceId::new("aaaaaaaaaaaaaaaa")));
    let mut rx = bus.subscribe();

    let cancel = CancellationToken::new();
    let listener = tokio::spawn(run_listener(Arc::clone(&store), Arc::clone(&bus), cancel.clone()));
    tokio::task::yield_now().await;

    // Same source instance as the bus: the round-tripped copy must not come back.
    let own_event = sample_event("aaaaaaaaaaaaaaaa");
    store
        .publish(EVENTS_CHANNEL, &serde_json::to_string(&own_event).unwrap())
        .await
        .unwrap();

    // A later peer event still arrives, proving the listener kept running.
    let peer_event = sample_event("cccccccccccccccc");
    store
        .publish(EVENTS_CHANNEL, &serde_json::to_string(&peer_event).unwrap())
        .await
        .unwrap();

    assert_eq!(recv_one(&mut rx).await, peer_event);
    assert_no_event(&mut rx).await;

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn listener_skips_malformed_payloads() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::with_instance(InstanceId::new("bbbbbbbbbbbbbbbb")));
    let mut rx = bus.subscribe();

    let cancel = CancellationToken::new();
    let listener = tokio::spawn(run_listener(Arc::clone(&store), Arc::clone(&bus), cancel.clone()));
    tokio::task::yield_now().await;

    store.publish(EVENTS_CHANNEL, "{not json").await.unwrap();
    store.publish(EVENTS_CHANNEL, "{\"action\": \"added\"}").await.unwrap();

    let peer_event = sample_event("aaaaaaaaaaaaaaaa");
    store
        .publish(EVENTS_CHANNEL, &serde_json::to_string(&peer_event).unwrap())
        .await
        .unwrap();

    assert_eq!(recv_one(&mut rx).await, peer_event);

    cancel.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn listener_cancellation_is_clean_exit() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::new());
    let cancel = CancellationToken::new();

    let listener = tokio::spawn(run_listener(Arc::clone(&store), bus, cancel.clone()));
    tokio::task::yield_now().await;

    cancel.cancel();
    timeout(Duration::from_secs(1), listener).await.unwrap().unwrap();
}

#[tokio::test]
async fn listener_on_disconnected_store_returns() {
    let store = Arc::new(MemoryStore::new());
    store.set_connected(false);
    let bus = Arc::new(EventBus::new());

    // Subscribe fails; the task logs and returns instead of spinning.
    run_listener(store, bus, CancellationToken::new()).await;
}
