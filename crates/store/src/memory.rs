// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store session for tests.
//!
//! Implements the full [`StoreConn`] contract over plain collections,
//! with a broadcast channel standing in for pub/sub. TTLs are accepted
//! and ignored (tests never outlive them). `set_connected(false)` makes
//! every operation fail with `NotConnected`, which is how the
//! disconnected paths are exercised.

use crate::conn::{MessageStream, ScoreOrder, StoreConn};
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, Vec<(String, f64)>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// Fake store backend shared by the queue, bus, and gateway tests.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    connected: Mutex<bool>,
    publish_fails: Mutex<bool>,
    events: broadcast::Sender<(String, String)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner::default()),
            connected: Mutex::new(true),
            publish_fails: Mutex::new(false),
            events,
        }
    }

    /// Toggle the simulated connection state.
    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }

    /// Make `publish` fail while everything else keeps working, to
    /// exercise the dropped-publish path.
    pub fn set_publish_fails(&self, fails: bool) {
        *self.publish_fails.lock() = fails;
    }

    fn guard(&self) -> Result<(), StoreError> {
        if *self.connected.lock() {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve an inclusive start/stop pair (negatives count from the end)
/// into concrete bounds, or None when the range is empty.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let n = len as isize;
    let mut start = if start < 0 { n + start } else { start };
    let mut stop = if stop < 0 { n + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= n {
        stop = n - 1;
    }
    if n == 0 || start >= n || stop < 0 || start > stop {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Members of a zset ordered by (score, member), ascending.
fn sorted_members(zset: &[(String, f64)]) -> Vec<String> {
    let mut entries: Vec<&(String, f64)> = zset.iter().collect();
    entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().map(|(member, _)| member.clone()).collect()
}

#[async_trait]
impl StoreConn for MemoryStore {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.guard()?;
        self.inner.lock().lists.entry(key.to_string()).or_default().push_front(value.to_string());
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.guard()?;
        self.inner.lock().lists.entry(key.to_string()).or_default().push_back(value.to_string());
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.guard()?;
        Ok(self.inner.lock().lists.get_mut(key).and_then(VecDeque::pop_back))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.guard()?;
        let inner = self.inner.lock();
        let Some(list) = inner.lists.get(key) else { return Ok(vec![]) };
        let Some((start, stop)) = resolve_range(list.len(), start, stop) else { return Ok(vec![]) };
        Ok(list.iter().skip(start).take(stop - start + 1).cloned().collect())
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.guard()?;
        Ok(self.inner.lock().lists.get(key).map_or(0, VecDeque::len))
    }

    async fn lrem(&self, key: &str, count: usize, value: &str) -> Result<usize, StoreError> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else { return Ok(0) };
        let mut removed = 0;
        while removed < count {
            let Some(pos) = list.iter().position(|v| v == value) else { break };
            list.remove(pos);
            removed += 1;
        }
        Ok(removed)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let Some(list) = inner.lists.get_mut(key) else { return Ok(()) };
        match resolve_range(list.len(), start, stop) {
            Some((start, stop)) => {
                *list = list.iter().skip(start).take(stop - start + 1).cloned().collect();
            }
            None => list.clear(),
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.guard()?;
        self.inner.lock().sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<usize, StoreError> {
        self.guard()?;
        let removed = self
            .inner
            .lock()
            .sets
            .get_mut(key)
            .is_some_and(|set| set.remove(member));
        Ok(usize::from(removed))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.guard()?;
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let zset = inner.zsets.entry(key.to_string()).or_default();
        zset.retain(|(m, _)| m != member);
        zset.push((member.to_string(), score));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<usize, StoreError> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let Some(zset) = inner.zsets.get_mut(key) else { return Ok(0) };
        let before = zset.len();
        zset.retain(|(m, _)| m != member);
        Ok(before - zset.len())
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        order: ScoreOrder,
    ) -> Result<Vec<String>, StoreError> {
        self.guard()?;
        let inner = self.inner.lock();
        let Some(zset) = inner.zsets.get(key) else { return Ok(vec![]) };
        let mut members = sorted_members(zset);
        if order == ScoreOrder::Descending {
            members.reverse();
        }
        let Some((start, stop)) = resolve_range(members.len(), start, stop) else {
            return Ok(vec![]);
        };
        Ok(members[start..=stop].to_vec())
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        self.guard()?;
        Ok(self.inner.lock().zsets.get(key).map_or(0, Vec::len))
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.guard()?;
        Ok(self.inner.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        self.guard()
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.guard()?;
        let mut inner = self.inner.lock();
        let existed = inner.lists.remove(key).is_some()
            | inner.sets.remove(key).is_some()
            | inner.zsets.remove(key).is_some()
            | inner.hashes.remove(key).is_some();
        Ok(existed)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.guard()?;
        if *self.publish_fails.lock() {
            return Err(StoreError::Transport(::redis::RedisError::from((
                ::redis::ErrorKind::IoError,
                "simulated publish failure",
            ))));
        }
        // No subscribers is fine; publish is fire and forget.
        let _ = self.events.send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        self.guard()?;
        let rx = self.events.subscribe();
        let channel = channel.to_string();
        let stream = futures_util::stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((ch, payload)) if ch == channel => return Some((payload, rx)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
