// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::id::QueueId;
use crate::item::parse_ts;

#[test]
fn empty_state_serializes_with_all_sections() {
    let json = serde_json::to_value(QueueState::default()).unwrap();
    assert_eq!(json["pending"], serde_json::json!([]));
    assert_eq!(json["running"], serde_json::json!([]));
    assert_eq!(json["failed"], serde_json::json!([]));
    assert_eq!(json["history"], serde_json::json!([]));
    assert_eq!(json["stats"]["total_pending"], 0);
    assert_eq!(json["stats"]["total_completed_today"], 0);
}

#[test]
fn stats_keys_are_snake_case() {
    let stats = QueueStats {
        total_pending: 3,
        total_running: 1,
        total_failed: 2,
        total_completed_today: 7,
    };
    let json = serde_json::to_value(stats).unwrap();
    let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["total_pending", "total_running", "total_failed", "total_completed_today"]
    );
}

#[test]
fn state_round_trips_through_json() {
    let item = WorkItem::new(
        QueueId::new("q_1"),
        "job-1",
        "Title",
        "Co",
        "full_pipeline",
        "auto",
        parse_ts("2026-01-15T12:00:00Z").unwrap(),
    );
    let state = QueueState {
        pending: vec![item.clone()],
        running: vec![],
        failed: vec![item],
        history: vec![],
        stats: QueueStats { total_pending: 1, total_failed: 1, ..Default::default() },
    };
    let json = serde_json::to_string(&state).unwrap();
    let decoded: QueueState = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, state);
}
