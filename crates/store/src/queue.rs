// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent queue state machine.
//!
//! One logical work item is spread across four structures: the pending
//! list (`LPUSH` head / `RPOP` tail gives FIFO), the running set, the
//! failed ordering (scored by failure time), the capped history list,
//! and an item hash per queue id. Cross-structure moves are two adjacent
//! non-atomic steps; the narrow inconsistency windows are repaired by
//! [`QueueStore::restore_interrupted_runs`] and
//! [`QueueStore::cleanup_stale`].

use crate::bus::EventBus;
use crate::conn::{ScoreOrder, StoreConn};
use crate::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use runq_core::{
    Clock, EventAction, QueueEvent, QueueId, QueueState, QueueStats, WorkItem, WorkItemStatus,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pending ordering (list; head = newest, tail = next to serve).
pub const PENDING_KEY: &str = "queue:pending";
/// Running membership (set).
pub const RUNNING_KEY: &str = "queue:running";
/// Failed ordering (sorted set scored by failure epoch seconds).
pub const FAILED_KEY: &str = "queue:failed";
/// Recent completions (capped list; head = most recent).
pub const HISTORY_KEY: &str = "queue:history";
/// Item hash prefix; one hash per queue id.
pub const ITEM_PREFIX: &str = "queue:item:";
/// Pub/sub channel carrying serialized queue events.
pub const EVENTS_CHANNEL: &str = "queue:events";

/// History keeps at most this many completions.
pub const HISTORY_CAP: usize = 100;
/// Item hashes expire this long after their last write.
pub const ITEM_TTL: std::time::Duration = std::time::Duration::from_secs(86_400 * 7);

/// Snapshot caps for the failed and history panels.
const FAILED_PAGE: usize = 20;
const HISTORY_PAGE: usize = 20;

/// Breakdown returned by [`QueueStore::cleanup_stale`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    /// Pending items older than the cutoff, moved to failed with a timeout error
    pub stale_pending_removed: u32,
    /// Pending entries with no backing hash, or with a non-pending status
    pub orphan_pending_removed: u32,
    /// Running entries with no backing hash
    pub orphan_running_removed: u32,
}

impl CleanupStats {
    pub fn total(&self) -> u32 {
        self.stale_pending_removed + self.orphan_pending_removed + self.orphan_running_removed
    }
}

/// Breakdown returned by [`QueueStore::clear_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearStats {
    pub pending_cleared: u32,
    pub running_cleared: u32,
    pub failed_cleared: u32,
    pub history_cleared: u32,
    pub items_deleted: u32,
}

/// The durable FIFO work queue.
///
/// Owns every mutation of the persistent layout; other components only
/// see read-only item snapshots. Each mutation that changes observable
/// state emits exactly one event through the bus after its hash write
/// has committed.
pub struct QueueStore<S, C> {
    conn: Arc<S>,
    clock: C,
    bus: Arc<EventBus>,
}

impl<S: StoreConn, C: Clock> QueueStore<S, C> {
    pub fn new(conn: Arc<S>, clock: C, bus: Arc<EventBus>) -> Self {
        Self { conn, clock, bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn conn(&self) -> &Arc<S> {
        &self.conn
    }

    fn item_key(queue_id: &QueueId) -> String {
        format!("{ITEM_PREFIX}{queue_id}")
    }

    /// Seconds-since-epoch score for the failed ordering.
    fn failure_score(at: DateTime<Utc>) -> f64 {
        at.timestamp_micros() as f64 / 1_000_000.0
    }

    /// Write the item hash and reset its TTL.
    async fn write_item(&self, item: &WorkItem) -> Result<(), StoreError> {
        let key = Self::item_key(&item.queue_id);
        self.conn.hset_all(&key, &item.to_hash()).await?;
        self.conn.expire(&key, ITEM_TTL).await?;
        Ok(())
    }

    /// Publish the event on the store channel (best effort — a dropped
    /// publish never fails the mutation) and dispatch it locally.
    async fn emit(&self, action: EventAction, item: &WorkItem) {
        let event = QueueEvent {
            action,
            item: item.clone(),
            timestamp: self.clock.now_utc(),
            source_instance: self.bus.instance().clone(),
        };
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(e) = self.conn.publish(EVENTS_CHANNEL, &payload).await {
                    warn!(error = %e, action = %action, "failed to publish queue event");
                }
            }
            Err(e) => warn!(error = %e, action = %action, "failed to encode queue event"),
        }
        self.bus.dispatch_local(&event);
    }

    /// Add a job to the queue. Returns the created item with its 1-based
    /// position from the serving tail.
    pub async fn enqueue(
        &self,
        job_id: &str,
        job_title: &str,
        company: &str,
        operation: &str,
        processing_tier: &str,
    ) -> Result<WorkItem, StoreError> {
        let mut item = WorkItem::new(
            QueueId::generate(),
            job_id,
            job_title,
            company,
            operation,
            processing_tier,
            self.clock.now_utc(),
        );

        self.write_item(&item).await?;
        self.conn.lpush(PENDING_KEY, item.queue_id.as_str()).await?;
        item.position = self.conn.llen(PENDING_KEY).await? as u32;

        self.emit(EventAction::Added, &item).await;
        info!(queue_id = %item.queue_id, job_id, position = item.position, "enqueued job");
        Ok(item)
    }

    /// Take the next job (FIFO): pop the pending tail and move it to
    /// running. Returns None when the queue is empty, or when the popped
    /// entry has no backing hash (the orphan is simply dropped from
    /// pending; `cleanup_stale` handles the rest of its kind).
    pub async fn dequeue(&self) -> Result<Option<WorkItem>, StoreError> {
        let Some(id) = self.conn.rpop(PENDING_KEY).await? else {
            return Ok(None);
        };
        let queue_id = QueueId::new(id);

        let Some(mut item) = self.get_item(&queue_id).await? else {
            warn!(%queue_id, "queue entry has no backing item after dequeue");
            return Ok(None);
        };

        self.conn.sadd(RUNNING_KEY, queue_id.as_str()).await?;

        item.status = WorkItemStatus::Running;
        item.started_at = Some(self.clock.now_utc());
        item.position = 0;
        self.write_item(&item).await?;

        self.emit(EventAction::Started, &item).await;
        info!(%queue_id, job_id = %item.job_id, "dequeued job");
        Ok(Some(item))
    }

    /// Mark a running job completed or failed. Returns None (no event)
    /// when the item does not exist. Removal from the running set is
    /// best effort: a concurrent restore may already have taken it.
    pub async fn complete(
        &self,
        queue_id: &QueueId,
        success: bool,
        error: Option<&str>,
    ) -> Result<Option<WorkItem>, StoreError> {
        let Some(mut item) = self.get_item(queue_id).await? else {
            warn!(%queue_id, "cannot complete: queue item not found");
            return Ok(None);
        };

        self.conn.srem(RUNNING_KEY, queue_id.as_str()).await?;
        let finished = self.clock.now_utc();
        item.completed_at = Some(finished);
        item.position = 0;

        if success {
            item.status = WorkItemStatus::Completed;
            self.write_item(&item).await?;
            self.push_history(queue_id).await?;
            self.emit(EventAction::Completed, &item).await;
            info!(%queue_id, job_id = %item.job_id, "completed job");
        } else {
            item.status = WorkItemStatus::Failed;
            item.error = error.map(str::to_string);
            self.write_item(&item).await?;
            self.conn
                .zadd(FAILED_KEY, queue_id.as_str(), Self::failure_score(finished))
                .await?;
            self.emit(EventAction::Failed, &item).await;
            warn!(%queue_id, job_id = %item.job_id, error = error.unwrap_or(""), "failed job");
        }

        Ok(Some(item))
    }

    /// Convenience wrapper: `complete` with `success = false`.
    pub async fn fail(&self, queue_id: &QueueId, error: &str) -> Result<Option<WorkItem>, StoreError> {
        self.complete(queue_id, false, Some(error)).await
    }

    /// Re-admit a failed job at the front of the line. Pushing to the
    /// pending *tail* makes it the immediate next dequeue — a retry
    /// takes precedence over waiting work. Returns None when the item is
    /// missing or not failed.
    pub async fn retry(&self, queue_id: &QueueId) -> Result<Option<WorkItem>, StoreError> {
        let Some(mut item) = self.get_item(queue_id).await? else {
            warn!(%queue_id, "cannot retry: queue item not found");
            return Ok(None);
        };
        if item.status != WorkItemStatus::Failed {
            warn!(%queue_id, status = %item.status, "cannot retry: not failed");
            return Ok(None);
        }

        self.conn.zrem(FAILED_KEY, queue_id.as_str()).await?;

        item.status = WorkItemStatus::Pending;
        item.started_at = None;
        item.completed_at = None;
        item.error = None;
        item.run_id = None;
        item.position = 0;
        self.write_item(&item).await?;

        self.conn.rpush(PENDING_KEY, queue_id.as_str()).await?;
        item.position = 1;

        self.emit(EventAction::Retried, &item).await;
        info!(%queue_id, job_id = %item.job_id, "retried job");
        Ok(Some(item))
    }

    /// Cancel a pending job. Returns false (no event) when the item is
    /// missing or not pending.
    pub async fn cancel(&self, queue_id: &QueueId) -> Result<bool, StoreError> {
        let Some(mut item) = self.get_item(queue_id).await? else {
            warn!(%queue_id, "cannot cancel: queue item not found");
            return Ok(false);
        };
        if item.status != WorkItemStatus::Pending {
            warn!(%queue_id, status = %item.status, "cannot cancel: not pending");
            return Ok(false);
        }

        self.conn.lrem(PENDING_KEY, 1, queue_id.as_str()).await?;

        item.status = WorkItemStatus::Cancelled;
        item.completed_at = Some(self.clock.now_utc());
        item.position = 0;
        self.write_item(&item).await?;

        self.emit(EventAction::Cancelled, &item).await;
        info!(%queue_id, job_id = %item.job_id, "cancelled job");
        Ok(true)
    }

    /// Move a failed job out of the failed panel into history without
    /// retrying it. The status stays Failed; this is a visibility move.
    pub async fn dismiss_failed(&self, queue_id: &QueueId) -> Result<bool, StoreError> {
        let Some(item) = self.get_item(queue_id).await? else {
            return Ok(false);
        };
        if item.status != WorkItemStatus::Failed {
            return Ok(false);
        }

        self.conn.zrem(FAILED_KEY, queue_id.as_str()).await?;
        self.push_history(queue_id).await?;

        self.emit(EventAction::Dismissed, &item).await;
        info!(%queue_id, "dismissed failed job");
        Ok(true)
    }

    /// Record the pipeline run id on an item mid-execution.
    pub async fn link_run_id(
        &self,
        queue_id: &QueueId,
        run_id: &str,
    ) -> Result<Option<WorkItem>, StoreError> {
        let Some(mut item) = self.get_item(queue_id).await? else {
            return Ok(None);
        };
        item.run_id = Some(run_id.to_string());
        self.write_item(&item).await?;
        self.emit(EventAction::Updated, &item).await;
        debug!(%queue_id, run_id, "linked run id");
        Ok(Some(item))
    }

    /// Direct hash read. None when the hash does not exist (expired or
    /// never written).
    pub async fn get_item(&self, queue_id: &QueueId) -> Result<Option<WorkItem>, StoreError> {
        let data = self.conn.hgetall(&Self::item_key(queue_id)).await?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(WorkItem::from_hash(queue_id.clone(), &data)))
    }

    /// Find an item by its external job id.
    ///
    /// Scan order matters: running first, then pending (tail-relative
    /// position attached), then failed by ascending score. An in-flight
    /// retry therefore wins over an older failed row for the same job.
    pub async fn get_item_by_job_id(&self, job_id: &str) -> Result<Option<WorkItem>, StoreError> {
        for id in self.conn.smembers(RUNNING_KEY).await? {
            if let Some(item) = self.get_item(&QueueId::new(id)).await? {
                if item.job_id == job_id {
                    return Ok(Some(item));
                }
            }
        }

        let pending_ids = self.conn.lrange(PENDING_KEY, 0, -1).await?;
        for (i, id) in pending_ids.iter().rev().enumerate() {
            if let Some(mut item) = self.get_item(&QueueId::new(id.clone())).await? {
                if item.job_id == job_id {
                    item.position = (i + 1) as u32;
                    return Ok(Some(item));
                }
            }
        }

        for id in self.conn.zrange(FAILED_KEY, 0, -1, ScoreOrder::Ascending).await? {
            if let Some(item) = self.get_item(&QueueId::new(id)).await? {
                if item.job_id == job_id {
                    return Ok(Some(item));
                }
            }
        }

        Ok(None)
    }

    /// Build the full snapshot for UI clients.
    ///
    /// Pending is the bounded tail-nearest slice reordered head-first;
    /// position 1 is the next dequeue. Membership entries without a
    /// backing hash are skipped (and later repaired by `cleanup_stale`),
    /// so a panel may come back shorter than its cap.
    pub async fn get_state(&self, pending_limit: usize) -> Result<QueueState, StoreError> {
        let total_pending = self.conn.llen(PENDING_KEY).await?;
        let pending_ids = if pending_limit == 0 {
            Vec::new()
        } else {
            self.conn.lrange(PENDING_KEY, -(pending_limit as isize), -1).await?
        };

        let mut pending = Vec::new();
        for (i, id) in pending_ids.iter().rev().enumerate() {
            match self.get_item(&QueueId::new(id.clone())).await? {
                Some(mut item) => {
                    item.position = (i + 1) as u32;
                    pending.push(item);
                }
                None => debug!(queue_id = %id, "skipping pending entry with no backing item"),
            }
        }

        let mut running = Vec::new();
        for id in self.conn.smembers(RUNNING_KEY).await? {
            if let Some(item) = self.get_item(&QueueId::new(id)).await? {
                running.push(item);
            }
        }

        let mut failed = Vec::new();
        for id in self
            .conn
            .zrange(FAILED_KEY, 0, FAILED_PAGE as isize - 1, ScoreOrder::Descending)
            .await?
        {
            if let Some(item) = self.get_item(&QueueId::new(id)).await? {
                failed.push(item);
            }
        }

        let mut history = Vec::new();
        for id in self.conn.lrange(HISTORY_KEY, 0, HISTORY_PAGE as isize - 1).await? {
            if let Some(item) = self.get_item(&QueueId::new(id)).await? {
                history.push(item);
            }
        }

        let stats = QueueStats {
            total_pending: total_pending as u32,
            total_running: running.len() as u32,
            total_failed: self.conn.zcard(FAILED_KEY).await? as u32,
            total_completed_today: self.count_completed_today().await?,
        };

        Ok(QueueState { pending, running, failed, history, stats })
    }

    /// Put every interrupted run back in line.
    ///
    /// Invoked once at lifecycle startup, before the event listener
    /// serves clients — which is why this emits no events. Items go to
    /// the pending tail (served next), with started/run-id/completion
    /// state cleared. Idempotent; a run with nothing in Running restores
    /// nothing.
    pub async fn restore_interrupted_runs(&self) -> Result<Vec<WorkItem>, StoreError> {
        let mut restored = Vec::new();

        for id in self.conn.smembers(RUNNING_KEY).await? {
            let queue_id = QueueId::new(id);
            let Some(mut item) = self.get_item(&queue_id).await? else {
                continue;
            };

            self.conn.srem(RUNNING_KEY, queue_id.as_str()).await?;

            item.status = WorkItemStatus::Pending;
            item.started_at = None;
            item.completed_at = None;
            item.run_id = None;
            item.position = 0;
            self.write_item(&item).await?;

            self.conn.rpush(PENDING_KEY, queue_id.as_str()).await?;
            info!(%queue_id, job_id = %item.job_id, "restored interrupted run");
            restored.push(item);
        }

        Ok(restored)
    }

    /// Repair orphaned membership entries and time out stale pending work.
    ///
    /// Pending entries with no backing hash are dropped; pending items
    /// older than `max_age_minutes` are moved to failed with a synthetic
    /// timeout error (emitting `failed`); pending entries whose status is
    /// not pending are dropped silently. Running entries with no backing
    /// hash are dropped.
    pub async fn cleanup_stale(&self, max_age_minutes: i64) -> Result<CleanupStats, StoreError> {
        let mut stats = CleanupStats::default();
        let cutoff = self.clock.now_utc() - Duration::minutes(max_age_minutes);

        for id in self.conn.lrange(PENDING_KEY, 0, -1).await? {
            let queue_id = QueueId::new(id);
            match self.get_item(&queue_id).await? {
                None => {
                    self.conn.lrem(PENDING_KEY, 1, queue_id.as_str()).await?;
                    stats.orphan_pending_removed += 1;
                    info!(%queue_id, "removed orphan pending entry");
                }
                Some(mut item) if item.status == WorkItemStatus::Pending && item.created_at < cutoff => {
                    self.conn.lrem(PENDING_KEY, 1, queue_id.as_str()).await?;

                    let finished = self.clock.now_utc();
                    item.status = WorkItemStatus::Failed;
                    item.error = Some(format!("Stale: pending for over {max_age_minutes} minutes"));
                    item.completed_at = Some(finished);
                    item.position = 0;
                    self.write_item(&item).await?;
                    self.conn
                        .zadd(FAILED_KEY, queue_id.as_str(), Self::failure_score(finished))
                        .await?;

                    self.emit(EventAction::Failed, &item).await;
                    stats.stale_pending_removed += 1;
                    info!(%queue_id, job_id = %item.job_id, "timed out stale pending job");
                }
                Some(item) if item.status != WorkItemStatus::Pending => {
                    // Bug symptom: a non-pending item still in the pending list.
                    self.conn.lrem(PENDING_KEY, 1, queue_id.as_str()).await?;
                    stats.orphan_pending_removed += 1;
                    info!(%queue_id, status = %item.status, "removed non-pending entry from pending list");
                }
                Some(_) => {}
            }
        }

        for id in self.conn.smembers(RUNNING_KEY).await? {
            let queue_id = QueueId::new(id);
            if self.get_item(&queue_id).await?.is_none() {
                self.conn.srem(RUNNING_KEY, queue_id.as_str()).await?;
                stats.orphan_running_removed += 1;
                info!(%queue_id, "removed orphan running entry");
            }
        }

        if stats.total() > 0 {
            info!(
                stale_pending = stats.stale_pending_removed,
                orphan_pending = stats.orphan_pending_removed,
                orphan_running = stats.orphan_running_removed,
                "queue cleanup finished"
            );
        }
        Ok(stats)
    }

    /// Admin-only: wipe every structure and every addressed item hash.
    /// Publishes no per-item events.
    pub async fn clear_all(&self) -> Result<ClearStats, StoreError> {
        let pending_ids = self.conn.lrange(PENDING_KEY, 0, -1).await?;
        let running_ids = self.conn.smembers(RUNNING_KEY).await?;
        let failed_ids = self.conn.zrange(FAILED_KEY, 0, -1, ScoreOrder::Ascending).await?;
        let history_ids = self.conn.lrange(HISTORY_KEY, 0, -1).await?;

        let mut stats = ClearStats {
            pending_cleared: pending_ids.len() as u32,
            running_cleared: running_ids.len() as u32,
            failed_cleared: failed_ids.len() as u32,
            history_cleared: history_ids.len() as u32,
            items_deleted: 0,
        };

        self.conn.del(PENDING_KEY).await?;
        self.conn.del(RUNNING_KEY).await?;
        self.conn.del(FAILED_KEY).await?;
        self.conn.del(HISTORY_KEY).await?;

        let all_ids: BTreeSet<String> = pending_ids
            .into_iter()
            .chain(running_ids)
            .chain(failed_ids)
            .chain(history_ids)
            .collect();
        for id in all_ids {
            if self.conn.del(&Self::item_key(&QueueId::new(id))).await? {
                stats.items_deleted += 1;
            }
        }

        warn!(
            pending = stats.pending_cleared,
            running = stats.running_cleared,
            failed = stats.failed_cleared,
            history = stats.history_cleared,
            items = stats.items_deleted,
            "queue cleared by admin"
        );
        Ok(stats)
    }

    /// Push a completion (or dismissal) onto history and trim to the cap.
    async fn push_history(&self, queue_id: &QueueId) -> Result<(), StoreError> {
        self.conn.lpush(HISTORY_KEY, queue_id.as_str()).await?;
        self.conn.ltrim(HISTORY_KEY, 0, HISTORY_CAP as isize - 1).await?;
        Ok(())
    }

    /// Count history entries completed today (UTC). History is ordered
    /// most recent first, so the walk stops at the first older entry;
    /// entries with no backing hash are skipped.
    async fn count_completed_today(&self) -> Result<u32, StoreError> {
        let today = self.clock.now_utc().date_naive();
        let mut count = 0;

        for id in self.conn.lrange(HISTORY_KEY, 0, -1).await? {
            let Some(item) = self.get_item(&QueueId::new(id)).await? else {
                continue;
            };
            let Some(completed_at) = item.completed_at else {
                continue;
            };
            if completed_at.date_naive() == today {
                count += 1;
            } else {
                break;
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
