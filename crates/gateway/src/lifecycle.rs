// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway lifecycle: startup, event fanout, shutdown.
//!
//! Startup order is load-bearing: connect the store, restore interrupted
//! runs, start the peer-event listener, then accept connections. The
//! restore runs before any client (or listener) can observe the queue,
//! which is why it emits no events.

use crate::config::Config;
use crate::protocol::ServerMessage;
use crate::registry::Registry;
use crate::session::{run_session, SessionCtx};
use runq_core::{Clock, QueueEvent, SystemClock};
use runq_store::{run_listener, EventBus, QueueStore, RedisStore, StoreConn, StoreError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Gateway startup/shutdown errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A running gateway, returned by [`Gateway::startup`].
pub struct Gateway {
    store: Arc<RedisStore>,
    registry: Arc<Registry>,
    accept_cancel: CancellationToken,
    tasks_cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    listener_task: JoinHandle<()>,
    fanout_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Gateway {
    /// Bring the gateway up: store, restore, listener, fanout, accept.
    pub async fn startup(config: Config) -> Result<Self, GatewayError> {
        // 1. Store connection
        let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
        let bus = Arc::new(EventBus::new());
        let queue = QueueStore::new(Arc::clone(&store), SystemClock, Arc::clone(&bus));

        // 2. Silent recovery of interrupted runs, before anyone listens
        let restored = queue.restore_interrupted_runs().await?;
        if !restored.is_empty() {
            info!(count = restored.len(), "restored interrupted runs to pending");
        }

        // 3. Peer-event listener and session fanout
        let tasks_cancel = CancellationToken::new();
        let listener_task = tokio::spawn(run_listener(
            Arc::clone(&store),
            Arc::clone(&bus),
            tasks_cancel.child_token(),
        ));

        let registry = Registry::new(config.ping_interval, config.pong_timeout);
        let fanout_task = tokio::spawn(run_fanout(
            bus.subscribe(),
            Arc::clone(&registry),
            tasks_cancel.child_token(),
        ));

        // 4. Accept connections
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|e| GatewayError::Bind(config.bind, e))?;
        let local_addr = listener.local_addr().map_err(|e| GatewayError::Bind(config.bind, e))?;

        let ctx = Arc::new(SessionCtx {
            queue,
            registry: Arc::clone(&registry),
            pending_limit: config.pending_limit,
        });
        let accept_cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, ctx, accept_cancel.clone()));

        info!(%local_addr, "gateway ready");
        Ok(Self {
            store,
            registry,
            accept_cancel,
            tasks_cancel,
            accept_task,
            listener_task,
            fanout_task,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tear the gateway down in order: stop accepting, stop the
    /// listener and fanout tasks, close every session, drop the store.
    pub async fn shutdown(self) {
        info!("shutting down gateway");

        self.accept_cancel.cancel();
        let _ = self.accept_task.await;

        self.tasks_cancel.cancel();
        let _ = self.listener_task.await;
        let _ = self.fanout_task.await;

        self.registry.drain().await;
        self.store.disconnect();

        info!("gateway shutdown complete");
    }
}

/// Accept loop; one task per connection.
pub async fn accept_loop<S: StoreConn, C: Clock + 'static>(
    listener: TcpListener,
    ctx: Arc<SessionCtx<S, C>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("accept loop cancelled");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "incoming connection");
                        tokio::spawn(run_session(stream, Arc::clone(&ctx)));
                    }
                    Err(e) => error!(error = %e, "accept error"),
                }
            }
        }
    }
}

/// Fanout task: every bus event goes to every registered session.
///
/// Sessions whose channel is gone are removed through the common
/// disconnect path (cancelling and awaiting their ping tasks).
pub async fn run_fanout(
    mut events: mpsc::UnboundedReceiver<QueueEvent>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("fanout cancelled");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut dead = Vec::new();
        for (id, outbound) in registry.senders() {
            if outbound.send(ServerMessage::Event(event.clone())).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            debug!(connection_id = id, "removing session after failed send");
            registry.disconnect(id).await;
        }
    }
}
