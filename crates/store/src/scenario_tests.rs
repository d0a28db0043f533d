// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end queue flows on the in-memory backend: enqueue through
//! dequeue, failure, retry, restart recovery, and cross-instance fanout.

use crate::bus::{run_listener, EventBus};
use crate::memory::MemoryStore;
use crate::queue::QueueStore;
use runq_core::{EventAction, FakeClock, InstanceId, WorkItemStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type TestStore = QueueStore<MemoryStore, FakeClock>;

fn instance(conn: &Arc<MemoryStore>, clock: &FakeClock, id: &str) -> TestStore {
    let bus = Arc::new(EventBus::with_instance(InstanceId::new(id)));
    QueueStore::new(Arc::clone(conn), clock.clone(), bus)
}

async fn enqueue(store: &TestStore, job_id: &str) -> runq_core::WorkItem {
    store.enqueue(job_id, "Title", "Co", "full_pipeline", "auto").await.unwrap()
}

#[tokio::test]
async fn enqueue_dequeue_fail_retry_flow() {
    let conn = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();
    let store = instance(&conn, &clock, "aaaaaaaaaaaaaaaa");
    let mut events = store.bus().subscribe();

    // Three enqueues emit three `added` events in order and list head-first.
    for job in ["j1", "j2", "j3"] {
        enqueue(&store, job).await;
    }
    for expected_job in ["j1", "j2", "j3"] {
        let event = events.try_recv().unwrap();
        assert_eq!(event.action, EventAction::Added);
        assert_eq!(event.item.job_id, expected_job);
    }
    let state = store.get_state(10).await.unwrap();
    let listed: Vec<(&str, u32)> =
        state.pending.iter().map(|i| (i.job_id.as_str(), i.position)).collect();
    assert_eq!(listed, vec![("j1", 1), ("j2", 2), ("j3", 3)]);

    // Two dequeues serve j1 then j2, both running with a start time.
    let q1 = store.dequeue().await.unwrap().unwrap();
    let q2 = store.dequeue().await.unwrap().unwrap();
    assert_eq!(q1.job_id, "j1");
    assert_eq!(q2.job_id, "j2");
    for item in [&q1, &q2] {
        assert_eq!(item.status, WorkItemStatus::Running);
        assert!(item.started_at.is_some());
    }
    assert_eq!(events.try_recv().unwrap().action, EventAction::Started);
    assert_eq!(events.try_recv().unwrap().action, EventAction::Started);

    // q2 fails: failed ordering holds it, history stays empty.
    store.complete(&q2.queue_id, false, Some("boom")).await.unwrap().unwrap();
    let failed_event = events.try_recv().unwrap();
    assert_eq!(failed_event.action, EventAction::Failed);
    assert_eq!(failed_event.item.error.as_deref(), Some("boom"));
    let state = store.get_state(10).await.unwrap();
    assert_eq!(state.failed.len(), 1);
    assert_eq!(state.failed[0].queue_id, q2.queue_id);
    assert!(state.history.is_empty());

    // Retry puts q2 ahead of the still-pending j3.
    store.retry(&q2.queue_id).await.unwrap().unwrap();
    assert_eq!(events.try_recv().unwrap().action, EventAction::Retried);
    let next = store.dequeue().await.unwrap().unwrap();
    assert_eq!(next.queue_id, q2.queue_id);

    let j3 = store.get_item_by_job_id("j3").await.unwrap().unwrap();
    assert_eq!(j3.status, WorkItemStatus::Pending);
    assert_eq!(j3.position, 1);
}

#[tokio::test]
async fn restart_restores_interrupted_runs() {
    let conn = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();

    let interrupted = {
        let store = instance(&conn, &clock, "aaaaaaaaaaaaaaaa");
        for job in ["j1", "j2", "j3"] {
            enqueue(&store, job).await;
        }
        let q1 = store.dequeue().await.unwrap().unwrap();
        let q2 = store.dequeue().await.unwrap().unwrap();
        store.link_run_id(&q1.queue_id, "run-1").await.unwrap();
        vec![q1.queue_id, q2.queue_id]
        // Store dropped here: the "crash".
    };

    // A new instance against the same persistent state recovers both runs.
    let store = instance(&conn, &clock, "bbbbbbbbbbbbbbbb");
    let restored = store.restore_interrupted_runs().await.unwrap();
    assert_eq!(restored.len(), 2);

    for queue_id in &interrupted {
        let item = store.get_item(queue_id).await.unwrap().unwrap();
        assert_eq!(item.status, WorkItemStatus::Pending);
        assert!(item.started_at.is_none());
        assert!(item.run_id.is_none());
    }

    let state = store.get_state(10).await.unwrap();
    assert_eq!(state.stats.total_pending, 3);
    assert_eq!(state.stats.total_running, 0);
}

#[tokio::test]
async fn events_cross_instances_exactly_once() {
    let conn = Arc::new(MemoryStore::new());
    let clock = FakeClock::new();

    let store_a = instance(&conn, &clock, "aaaaaaaaaaaaaaaa");
    let bus_b = Arc::new(EventBus::with_instance(InstanceId::new("bbbbbbbbbbbbbbbb")));

    let mut sub_a = store_a.bus().subscribe();
    let mut sub_b = bus_b.subscribe();

    // Both instances run listeners on the shared channel.
    let cancel = CancellationToken::new();
    let listener_a = tokio::spawn(run_listener(
        Arc::clone(&conn),
        Arc::clone(store_a.bus()),
        cancel.clone(),
    ));
    let listener_b =
        tokio::spawn(run_listener(Arc::clone(&conn), Arc::clone(&bus_b), cancel.clone()));
    tokio::task::yield_now().await;

    let item = enqueue(&store_a, "j1").await;

    // A's subscriber hears the event exactly once (direct dispatch only;
    // A's listener filtered the round-tripped copy).
    let event_a = timeout(Duration::from_secs(1), sub_a.recv()).await.unwrap().unwrap();
    assert_eq!(event_a.action, EventAction::Added);
    assert_eq!(event_a.item.queue_id, item.queue_id);
    assert!(timeout(Duration::from_millis(50), sub_a.recv()).await.is_err());

    // B's subscriber hears it exactly once, via B's listener.
    let event_b = timeout(Duration::from_secs(1), sub_b.recv()).await.unwrap().unwrap();
    assert_eq!(event_b.action, EventAction::Added);
    assert_eq!(event_b.source_instance.as_str(), "aaaaaaaaaaaaaaaa");
    assert!(timeout(Duration::from_millis(50), sub_b.recv()).await.is_err());

    cancel.cancel();
    listener_a.await.unwrap();
    listener_b.await.unwrap();
}
