// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry with per-session liveness probing.
//!
//! One mutex covers the whole session map: membership and ping-task
//! identity mutate together, so a task exists exactly when its session
//! is registered. The lock is only ever held for bookkeeping — sends go
//! through each session's outbound channel, never under the lock.
//!
//! Staleness eviction only cancels the session's token; the session's
//! own disconnect path is the single place an entry is removed and its
//! ping task cancelled and awaited, so no task can await its own join
//! handle.

use crate::protocol::ServerMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Monotonically increasing per-process session id; used for logs only.
pub type ConnectionId = u64;

struct SessionEntry {
    outbound: mpsc::UnboundedSender<ServerMessage>,
    cancel: CancellationToken,
    last_pong: Instant,
    ping_task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    next_id: ConnectionId,
    sessions: HashMap<ConnectionId, SessionEntry>,
}

/// Tracks every live WebSocket session.
pub struct Registry {
    inner: Mutex<Inner>,
    ping_interval: Duration,
    pong_timeout: Duration,
}

impl Registry {
    pub fn new(ping_interval: Duration, pong_timeout: Duration) -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(Inner::default()), ping_interval, pong_timeout })
    }

    /// Register a session and start its ping task.
    pub fn register(
        self: &Arc<Self>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        cancel: CancellationToken,
    ) -> ConnectionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.sessions.insert(
            id,
            SessionEntry { outbound, cancel, last_pong: Instant::now(), ping_task: None },
        );
        let task = tokio::spawn(ping_loop(Arc::downgrade(self), id));
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.ping_task = Some(task);
        }
        id
    }

    /// Record a pong from a session.
    pub fn touch_pong(&self, id: ConnectionId) {
        if let Some(entry) = self.inner.lock().sessions.get_mut(&id) {
            entry.last_pong = Instant::now();
            trace!(connection_id = id, "received pong");
        }
    }

    /// Snapshot of the outbound senders, for broadcast outside the lock.
    pub fn senders(&self) -> Vec<(ConnectionId, mpsc::UnboundedSender<ServerMessage>)> {
        self.inner
            .lock()
            .sessions
            .iter()
            .map(|(id, entry)| (*id, entry.outbound.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a session: cancel its token and await its ping task.
    ///
    /// Every termination path (clean close, transport error, staleness
    /// eviction) converges here.
    pub async fn disconnect(&self, id: ConnectionId) {
        let entry = self.inner.lock().sessions.remove(&id);
        let Some(mut entry) = entry else { return };
        entry.cancel.cancel();
        if let Some(task) = entry.ping_task.take() {
            let _ = task.await;
        }
        debug!(connection_id = id, "session removed from registry");
    }

    #[cfg(test)]
    pub(crate) fn last_pong(&self, id: ConnectionId) -> Option<Instant> {
        self.inner.lock().sessions.get(&id).map(|entry| entry.last_pong)
    }

    /// Disconnect every session (shutdown path).
    pub async fn drain(&self) {
        let ids: Vec<ConnectionId> = self.inner.lock().sessions.keys().copied().collect();
        for id in ids {
            self.disconnect(id).await;
        }
    }
}

enum Probe {
    /// Session gone; stop the loop.
    Exit,
    /// No pong within the timeout; evict.
    Evict(CancellationToken),
    /// Healthy; send a ping.
    Ping(mpsc::UnboundedSender<ServerMessage>),
}

/// Per-session ping loop.
///
/// Holds only a weak registry reference so a dropped registry ends the
/// loop. On staleness it cancels the session token and exits; the read
/// loop observes the cancellation and runs the disconnect path.
async fn ping_loop(registry: Weak<Registry>, id: ConnectionId) {
    let Some(period) = registry.upgrade().map(|r| r.ping_interval) else {
        return;
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; pinging starts one period in.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(registry) = registry.upgrade() else { return };

        let probe = {
            let inner = registry.inner.lock();
            match inner.sessions.get(&id) {
                None => Probe::Exit,
                Some(entry) if entry.last_pong.elapsed() > registry.pong_timeout => {
                    Probe::Evict(entry.cancel.clone())
                }
                Some(entry) => Probe::Ping(entry.outbound.clone()),
            }
        };

        match probe {
            Probe::Exit => return,
            Probe::Evict(cancel) => {
                warn!(
                    connection_id = id,
                    timeout_secs = registry.pong_timeout.as_secs(),
                    "session stale, evicting"
                );
                cancel.cancel();
                return;
            }
            Probe::Ping(outbound) => {
                if outbound.send(ServerMessage::Ping).is_err() {
                    return;
                }
                trace!(connection_id = id, "sent ping");
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
