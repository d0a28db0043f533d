// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One WebSocket session: handshake, snapshot, read loop.
//!
//! The socket splits into a sink owned by a writer task and a source
//! read here; everything outbound (snapshot, command replies, fanout
//! frames, pings) goes through the session's channel, so no send ever
//! happens under the registry lock.

use crate::protocol::{parse_frame, ClientMessage, ParsedFrame, ServerMessage};
use crate::registry::{ConnectionId, Registry};
use futures_util::{SinkExt, StreamExt};
use runq_core::Clock;
use runq_store::{QueueStore, StoreConn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared context for every session.
pub struct SessionCtx<S, C> {
    pub queue: QueueStore<S, C>,
    pub registry: Arc<Registry>,
    /// Pending items included in snapshots
    pub pending_limit: usize,
}

/// Accept the handshake and run the session to completion.
pub async fn run_session<S: StoreConn, C: Clock>(stream: TcpStream, ctx: Arc<SessionCtx<S, C>>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let cancel = CancellationToken::new();
    let id = ctx.registry.register(outbound.clone(), cancel.clone());
    info!(connection_id = id, total = ctx.registry.len(), "websocket connected");

    // Writer task owns the sink and drains the outbound channel.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(Message::text(message.to_text())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Initial snapshot; a live event stream follows.
    match ctx.queue.get_state(ctx.pending_limit).await {
        Ok(state) => {
            let _ = outbound.send(ServerMessage::QueueState(state));
        }
        Err(e) => {
            error!(connection_id = id, error = %e, "failed to send initial snapshot");
            let _ = outbound.send(ServerMessage::Error { message: e.to_string() });
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(connection_id = id, "session cancelled");
                break;
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&ctx, id, &text).await {
                            let _ = outbound.send(reply);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and transport-level ping/pong are ignored
                    Some(Err(e)) => {
                        debug!(connection_id = id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    ctx.registry.disconnect(id).await;
    drop(outbound);
    let _ = writer.await;
    info!(connection_id = id, total = ctx.registry.len(), "websocket disconnected");
}

/// Handle one inbound text frame, returning the reply for this session
/// (if any). Errors never terminate the session; they answer `error` to
/// the offending client only.
pub async fn handle_frame<S: StoreConn, C: Clock>(
    ctx: &SessionCtx<S, C>,
    id: ConnectionId,
    text: &str,
) -> Option<ServerMessage> {
    let message = match parse_frame(text) {
        ParsedFrame::Message(message) => message,
        ParsedFrame::Invalid => {
            return Some(ServerMessage::Error { message: "Invalid JSON".to_string() });
        }
        ParsedFrame::UnknownType(kind) => {
            warn!(connection_id = id, kind, "unknown websocket message type");
            return Some(ServerMessage::Error {
                message: format!("Unknown message type: {kind}"),
            });
        }
    };

    match message {
        ClientMessage::Retry { queue_id } => match ctx.queue.retry(&queue_id).await {
            Ok(Some(_)) => {
                Some(ServerMessage::ActionResult { action: "retry", success: true, queue_id })
            }
            Ok(None) => Some(ServerMessage::Error {
                message: format!("Cannot retry {queue_id}: not found or not failed"),
            }),
            Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
        },
        ClientMessage::Cancel { queue_id } => match ctx.queue.cancel(&queue_id).await {
            Ok(success) => {
                Some(ServerMessage::ActionResult { action: "cancel", success, queue_id })
            }
            Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
        },
        ClientMessage::Dismiss { queue_id } => match ctx.queue.dismiss_failed(&queue_id).await {
            Ok(success) => {
                Some(ServerMessage::ActionResult { action: "dismiss", success, queue_id })
            }
            Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
        },
        ClientMessage::Refresh => match ctx.queue.get_state(ctx.pending_limit).await {
            Ok(state) => Some(ServerMessage::QueueState(state)),
            Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
        },
        ClientMessage::Ping => Some(ServerMessage::Pong),
        ClientMessage::Pong => {
            ctx.registry.touch_pong(id);
            None
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
