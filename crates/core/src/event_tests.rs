// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::id::QueueId;
use crate::item::parse_ts;
use yare::parameterized;

fn sample_event(action: EventAction) -> QueueEvent {
    let item = WorkItem::new(
        QueueId::new("q_abc123def456"),
        "job-1",
        "Title",
        "Co",
        "full_pipeline",
        "auto",
        parse_ts("2026-01-15T12:00:00Z").unwrap(),
    );
    QueueEvent {
        action,
        item,
        timestamp: parse_ts("2026-01-15T12:00:01Z").unwrap(),
        source_instance: InstanceId::new("deadbeefcafe0123"),
    }
}

#[parameterized(
    added = { EventAction::Added, "added" },
    started = { EventAction::Started, "started" },
    completed = { EventAction::Completed, "completed" },
    failed = { EventAction::Failed, "failed" },
    retried = { EventAction::Retried, "retried" },
    cancelled = { EventAction::Cancelled, "cancelled" },
    dismissed = { EventAction::Dismissed, "dismissed" },
    updated = { EventAction::Updated, "updated" },
)]
fn action_wire_strings(action: EventAction, expected: &str) {
    assert_eq!(action.to_string(), expected);
    assert_eq!(serde_json::to_value(action).unwrap(), serde_json::json!(expected));
}

#[test]
fn event_channel_shape() {
    let json = serde_json::to_value(sample_event(EventAction::Added)).unwrap();
    assert_eq!(json["action"], "added");
    assert_eq!(json["source_instance"], "deadbeefcafe0123");
    assert_eq!(json["item"]["queue_id"], "q_abc123def456");
    // Absent optionals are explicit nulls on the channel
    assert!(json["item"]["run_id"].is_null());
}

#[test]
fn event_round_trips_through_json() {
    let event = sample_event(EventAction::Failed);
    let json = serde_json::to_string(&event).unwrap();
    let decoded: QueueEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, event);
}
