// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue mutation events.
//!
//! Every state-changing queue operation emits one event. Events are
//! dispatched to in-process subscribers and published on the store's
//! `queue:events` channel so peer instances see them too.

use crate::id::InstanceId;
use crate::item::WorkItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// Enqueued into pending
    Added,
    /// Dequeued by a worker
    Started,
    /// Finished successfully
    Completed,
    /// Reported failed (or timed out by stale cleanup)
    Failed,
    /// Failed item re-admitted at the front of the line
    Retried,
    /// Pending item cancelled
    Cancelled,
    /// Failed item moved to history without retry
    Dismissed,
    /// Metadata update (run id linked)
    Updated,
}

crate::simple_display! {
    EventAction {
        Added => "added",
        Started => "started",
        Completed => "completed",
        Failed => "failed",
        Retried => "retried",
        Cancelled => "cancelled",
        Dismissed => "dismissed",
        Updated => "updated",
    }
}

/// One queue mutation, as broadcast to subscribers and peers.
///
/// `source_instance` identifies the originating process; the pub/sub
/// listener uses it to drop events that round-tripped through the store
/// back to the instance that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub action: EventAction,
    pub item: WorkItem,
    pub timestamp: DateTime<Utc>,
    pub source_instance: InstanceId,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
