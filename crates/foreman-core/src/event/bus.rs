//! In-process fan-out of decoded worker events.
//!
//! The receiver publishes every event it drains from the results
//! channel; subscribers (the controller's log task, a playbook follower,
//! test harnesses) each get their own [`EventStream`]. Publishing never
//! blocks the receive loop: with nobody listening events are dropped,
//! and a subscriber that falls behind skips ahead past what it missed
//! instead of stalling the drain.

use foreman_types::event::Event;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Fan-out point between the receiver and in-process subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Hand a decoded event to every current subscriber.
    pub fn publish(&self, event: Event) {
        // No subscribers is fine; the receiver drains the results
        // channel either way.
        let _ = self.sender.send(event);
    }

    /// Open a stream over all events published from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            inner: self.sender.subscribe(),
        }
    }
}

/// One subscriber's view of the event stream.
pub struct EventStream {
    inner: broadcast::Receiver<Event>,
}

impl EventStream {
    /// The next event from any workflow, or `None` once every publisher
    /// is gone. A lagged subscriber logs what it missed and skips ahead.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event subscriber lagging, skipping ahead");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next event belonging to one workflow execution; events from
    /// other executions are skipped.
    pub async fn next_for(&mut self, execution_uid: &str) -> Option<Event> {
        while let Some(event) = self.next().await {
            if event.workflow_execution_uid() == execution_uid {
                return Some(event);
            }
        }
        None
    }
}
