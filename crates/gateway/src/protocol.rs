// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket wire format.
//!
//! Every frame is a UTF-8 JSON text frame shaped `{type, payload?}`.
//! Inbound frames parse into [`ClientMessage`]; outbound frames are
//! built by [`ServerMessage`]. Queue-event frames carry a dynamic
//! `type` equal to the event action, so the outbound side serializes
//! explicitly instead of through a tagged enum.

use runq_core::{QueueEvent, QueueId, QueueState};
use serde::{Deserialize, Serialize};

/// Commands a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Retry a failed item
    Retry { queue_id: QueueId },
    /// Cancel a pending item
    Cancel { queue_id: QueueId },
    /// Dismiss a failed item into history
    Dismiss { queue_id: QueueId },
    /// Request a fresh snapshot (answered to this session only)
    Refresh,
    /// Client-initiated keepalive; answered with `pong`
    Ping,
    /// Answer to a server-initiated `ping`
    Pong,
}

/// Outcome of a parse attempt on an inbound text frame.
pub enum ParsedFrame {
    Message(ClientMessage),
    /// Valid JSON, unrecognized `type`
    UnknownType(String),
    /// Not JSON at all
    Invalid,
}

/// Parse an inbound frame, distinguishing malformed JSON from an
/// unknown message type so each gets its own error reply.
pub fn parse_frame(text: &str) -> ParsedFrame {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return ParsedFrame::Invalid;
    };
    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(message) => ParsedFrame::Message(message),
        Err(_) => {
            let kind = value
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("<missing>")
                .to_string();
            ParsedFrame::UnknownType(kind)
        }
    }
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Server-initiated liveness probe
    Ping,
    /// Answer to a client `ping`
    Pong,
    /// Full snapshot
    QueueState(QueueState),
    /// Outcome of a retry/cancel/dismiss command
    ActionResult { action: &'static str, success: bool, queue_id: QueueId },
    /// Error reply to the offending session only
    Error { message: String },
    /// One queue event; the frame `type` is the event action
    Event(QueueEvent),
}

impl ServerMessage {
    /// Build the JSON frame value.
    pub fn to_frame(&self) -> serde_json::Value {
        match self {
            ServerMessage::Ping => serde_json::json!({ "type": "ping" }),
            ServerMessage::Pong => serde_json::json!({ "type": "pong" }),
            ServerMessage::QueueState(state) => {
                serde_json::json!({ "type": "queue_state", "payload": state })
            }
            ServerMessage::ActionResult { action, success, queue_id } => serde_json::json!({
                "type": "action_result",
                "payload": { "action": action, "success": success, "queue_id": queue_id },
            }),
            ServerMessage::Error { message } => {
                serde_json::json!({ "type": "error", "payload": { "message": message } })
            }
            ServerMessage::Event(event) => {
                serde_json::json!({ "type": event.action.to_string(), "payload": event })
            }
        }
    }

    /// Serialize to frame text.
    pub fn to_text(&self) -> String {
        self.to_frame().to_string()
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
