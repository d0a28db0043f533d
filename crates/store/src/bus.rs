// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fanout: local subscribers plus the cross-instance listener.
//!
//! Every mutation the queue store commits produces one [`QueueEvent`].
//! The store publishes it on the `queue:events` channel (best effort)
//! and hands it to [`EventBus::dispatch_local`], which delivers to every
//! in-process subscriber. [`run_listener`] is the other half: it
//! subscribes to the same channel and forwards peer events to local
//! subscribers, dropping the ones this instance originated — without
//! that filter every local event would arrive twice.

use crate::conn::StoreConn;
use crate::queue::EVENTS_CHANNEL;
use futures_util::StreamExt;
use parking_lot::Mutex;
use runq_core::{InstanceId, QueueEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Dispatches queue events to in-process subscribers.
///
/// Subscribers are channel senders; a subscriber whose receiver has gone
/// away is dropped at the next dispatch and never blocks its siblings.
pub struct EventBus {
    instance: InstanceId,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<QueueEvent>>>,
}

impl EventBus {
    /// Create a bus with a fresh process-lifetime instance id.
    pub fn new() -> Self {
        Self::with_instance(InstanceId::generate())
    }

    /// Create a bus with an explicit instance id (tests simulate peers this way).
    pub fn with_instance(instance: InstanceId) -> Self {
        Self { instance, subscribers: Mutex::new(Vec::new()) }
    }

    /// The id stamped onto every event this instance emits.
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Register a subscriber and return its event stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an event to every live subscriber.
    pub fn dispatch_local(&self, event: &QueueEvent) {
        self.subscribers.lock().retain(|tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(action = %event.action, "queue event subscriber gone, dropping it");
                false
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener task: forward peer events from the store channel to local
/// subscribers.
///
/// Events whose `source_instance` matches this bus are skipped — they
/// were already dispatched directly at emit time. Malformed payloads are
/// logged and skipped. Cancellation is a clean exit.
pub async fn run_listener<S: StoreConn>(conn: Arc<S>, bus: Arc<EventBus>, cancel: CancellationToken) {
    let mut messages = match conn.subscribe(EVENTS_CHANNEL).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "event listener failed to subscribe");
            return;
        }
    };
    debug!(instance = %bus.instance(), "event listener subscribed");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("event listener cancelled");
                break;
            }
            message = messages.next() => {
                match message {
                    Some(payload) => forward(&bus, &payload),
                    None => {
                        warn!("event channel closed, listener exiting");
                        break;
                    }
                }
            }
        }
    }
}

fn forward(bus: &EventBus, payload: &str) {
    let event: QueueEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "malformed event on channel, skipping");
            return;
        }
    };
    if event.source_instance == *bus.instance() {
        trace!(action = %event.action, "skipping own event from channel");
        return;
    }
    bus.dispatch_local(&event);
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
