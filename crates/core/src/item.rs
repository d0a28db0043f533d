// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work item model and its flat string-map codec.
//!
//! A work item is persisted as a string-keyed hash; the codec converts
//! between [`WorkItem`] and that flat representation. Decoding is total:
//! unknown keys are ignored, missing keys take documented defaults, and
//! malformed timestamps decode to absent rather than failing the record.

use crate::id::QueueId;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a work item through its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    /// Waiting in the pending list
    #[default]
    Pending,
    /// Checked out by a worker
    Running,
    /// Finished successfully
    Completed,
    /// Failed; waits in the failed ordering for retry or dismissal
    Failed,
    /// Cancelled while pending
    Cancelled,
}

crate::simple_display! {
    WorkItemStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl WorkItemStatus {
    /// Parse a status string; anything unrecognized falls back to Pending
    /// so a single bad field never fails the whole record.
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => WorkItemStatus::Running,
            "completed" => WorkItemStatus::Completed,
            "failed" => WorkItemStatus::Failed,
            "cancelled" => WorkItemStatus::Cancelled,
            _ => WorkItemStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Completed | WorkItemStatus::Failed | WorkItemStatus::Cancelled
        )
    }
}

/// A job in the queue.
///
/// Links a queue entry to an external job id and tracks its execution
/// status. `position` is derived (1-based distance from the serving
/// head, 0 when the item is not in the pending ordering) and is never
/// authoritative in storage; listings recompute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub queue_id: QueueId,
    /// External job id assigned by the producer. Not unique: retries and
    /// historical rows for the same job may coexist.
    pub job_id: String,
    pub job_title: String,
    pub company: String,
    pub status: WorkItemStatus,
    /// Opaque routing hint, carried verbatim
    pub operation: String,
    /// Opaque routing hint, carried verbatim
    pub processing_tier: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    /// Pipeline run id, linked by the worker mid-execution
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub position: u32,
}

impl WorkItem {
    /// Create a fresh pending item, as `enqueue` does.
    pub fn new(
        queue_id: QueueId,
        job_id: impl Into<String>,
        job_title: impl Into<String>,
        company: impl Into<String>,
        operation: impl Into<String>,
        processing_tier: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            queue_id,
            job_id: job_id.into(),
            job_title: job_title.into(),
            company: company.into(),
            status: WorkItemStatus::Pending,
            operation: operation.into(),
            processing_tier: processing_tier.into(),
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            run_id: None,
            position: 0,
        }
    }

    /// Encode to the flat hash representation.
    ///
    /// All values are strings; absent optionals encode as the empty
    /// string. The field name set is fixed and part of the persistent
    /// layout.
    pub fn to_hash(&self) -> Vec<(String, String)> {
        vec![
            ("job_id".into(), self.job_id.clone()),
            ("job_title".into(), self.job_title.clone()),
            ("company".into(), self.company.clone()),
            ("status".into(), self.status.to_string()),
            ("operation".into(), self.operation.clone()),
            ("processing_tier".into(), self.processing_tier.clone()),
            ("created_at".into(), encode_ts(Some(self.created_at))),
            ("started_at".into(), encode_ts(self.started_at)),
            ("completed_at".into(), encode_ts(self.completed_at)),
            ("error".into(), self.error.clone().unwrap_or_default()),
            ("run_id".into(), self.run_id.clone().unwrap_or_default()),
            ("position".into(), self.position.to_string()),
        ]
    }

    /// Decode from a hash read.
    ///
    /// Missing keys substitute defaults (`Unknown` title/company, pending
    /// status, `full_pipeline`/`auto` routing hints, decode-time now for
    /// `created_at`, position 0); empty strings decode optionals back to
    /// absent; unknown keys are ignored.
    pub fn from_hash(queue_id: QueueId, data: &HashMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).map(String::as_str).unwrap_or("");
        let opt = |key: &str| {
            let v = get(key);
            if v.is_empty() {
                None
            } else {
                Some(v.to_string())
            }
        };

        Self {
            queue_id,
            job_id: get("job_id").to_string(),
            job_title: non_empty_or(get("job_title"), "Unknown"),
            company: non_empty_or(get("company"), "Unknown"),
            status: WorkItemStatus::parse(get("status")),
            operation: non_empty_or(get("operation"), "full_pipeline"),
            processing_tier: non_empty_or(get("processing_tier"), "auto"),
            created_at: parse_ts(get("created_at")).unwrap_or_else(Utc::now),
            started_at: parse_ts(get("started_at")),
            completed_at: parse_ts(get("completed_at")),
            error: opt("error"),
            run_id: opt("run_id"),
            position: get("position").parse().unwrap_or(0),
        }
    }
}

fn non_empty_or(value: &str, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// Encode a timestamp as RFC 3339 UTC with microsecond precision,
/// or the empty string when absent.
pub fn encode_ts(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(t) => t.to_rfc3339_opts(SecondsFormat::Micros, true),
        None => String::new(),
    }
}

/// Parse an ISO-8601 timestamp, returning None for empty or malformed input.
///
/// Accepts both RFC 3339 (what we write) and zone-less ISO-8601 (what
/// earlier writers produced); zone-less values are taken as UTC.
pub fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
