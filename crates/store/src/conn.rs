// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store session contract.
//!
//! One narrow async trait covering exactly the primitives the queue
//! layout needs: list, set, sorted set, hash, TTL, delete, and pub/sub.
//! Range arguments follow the store's convention: inclusive start/stop
//! indices, negative values counting back from the end.

use crate::error::StoreError;
use async_trait::async_trait;
use futures_util::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

/// Stream of raw payloads from a pub/sub subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Iteration order for score-ordered range reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrder {
    Ascending,
    Descending,
}

/// A live session against the external key/value store.
///
/// Implementations must be cheap to share (`&self` methods only); the
/// queue store holds one behind an `Arc` and calls it from many tasks.
#[async_trait]
pub trait StoreConn: Send + Sync + 'static {
    /// Push a value onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Push a value onto the tail of a list.
    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically remove and return the tail of a list.
    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read an inclusive index range of a list, head first.
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;

    /// List length.
    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    /// Remove up to `count` head-most occurrences of a value; returns removed count.
    async fn lrem(&self, key: &str, count: usize, value: &str) -> Result<usize, StoreError>;

    /// Truncate a list to the inclusive index range.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError>;

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set; returns removed count.
    async fn srem(&self, key: &str, member: &str) -> Result<usize, StoreError>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Add (or rescore) a member of a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Remove a member from a sorted set; returns removed count.
    async fn zrem(&self, key: &str, member: &str) -> Result<usize, StoreError>;

    /// Read an inclusive index range of a sorted set in the given score order.
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: ScoreOrder,
    ) -> Result<Vec<String>, StoreError>;

    /// Sorted set cardinality.
    async fn zcard(&self, key: &str) -> Result<usize, StoreError>;

    /// Write all given hash fields.
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Read all hash fields; empty map when the key does not exist.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Set a key's time-to-live.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key; returns whether it existed.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Publish a payload on a channel (fire and forget).
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Subscribe to a channel, returning the stream of payloads.
    ///
    /// The subscription lives as long as the returned stream.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError>;
}
