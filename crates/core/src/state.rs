// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time queue snapshot for UI bootstrapping.

use crate::item::WorkItem;
use serde::{Deserialize, Serialize};

/// Aggregate counters for the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_pending: u32,
    pub total_running: u32,
    pub total_failed: u32,
    /// History entries whose completion date (UTC) is today
    pub total_completed_today: u32,
}

/// Complete queue state for broadcast to UI clients.
///
/// Produced on demand; never persisted. `pending` is a bounded slice
/// ordered head-first (position 1 = next to dequeue), `failed` is most
/// recent first, `history` is most recent completions first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueState {
    pub pending: Vec<WorkItem>,
    pub running: Vec<WorkItem>,
    pub failed: Vec<WorkItem>,
    pub history: Vec<WorkItem>,
    pub stats: QueueStats,
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
