//! The event receiver: drains the results channel and fans decoded events
//! out to in-process subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use foreman_types::event::EventId;
use foreman_types::wire::{self, WireError};
use tokio_util::sync::CancellationToken;

use crate::event::EventBus;
use crate::transport::PullChannel;

/// Controller-side event drain.
pub struct Receiver<P: PullChannel> {
    results: P,
    bus: EventBus,
    poll_interval: Duration,
    completed: AtomicU64,
    shutdown: CancellationToken,
}

impl<P: PullChannel> Receiver<P> {
    pub fn new(results: P, bus: EventBus, poll_interval: Duration) -> Self {
        Self {
            results,
            bus,
            poll_interval,
            completed: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of workflow shutdown events observed so far.
    pub fn workflows_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Terminate the receive loop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Drain the results channel until stopped.
    ///
    /// Each envelope is decoded into its typed event and published to the
    /// bus. An unknown callback name is logged and discarded -- never
    /// fatal.
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.results.try_recv().await {
                Ok(Some(bytes)) => match wire::decode_event(&bytes) {
                    Ok(event) => {
                        if event.id == EventId::WorkflowShutdown {
                            self.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        tracing::trace!(
                            callback = event.id.callback_name(),
                            execution_uid = event.workflow_execution_uid(),
                            "event received"
                        );
                        self.bus.publish(event);
                    }
                    Err(WireError::UnknownCallback(name)) => {
                        tracing::error!(callback = name.as_str(), "unknown callback sent");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding undecodable event envelope");
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "results channel receive failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!("receive loop stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PushChannel;
    use crate::transport::memory::memory_pipe;
    use foreman_types::event::{Event, WorkflowSender};
    use std::sync::Arc;

    fn sample_event(id: EventId, data: Option<String>) -> Event {
        Event::workflow(
            id,
            WorkflowSender {
                name: "wf".to_string(),
                uid: "u".to_string(),
                workflow_execution_uid: "e".to_string(),
            },
            data,
        )
    }

    #[tokio::test]
    async fn decodes_and_publishes_events() {
        let (push, pull) = memory_pipe();
        let bus = EventBus::new(16);
        let mut subscriber = bus.subscribe();
        let receiver = Arc::new(Receiver::new(pull, bus, Duration::from_millis(5)));

        let event = sample_event(EventId::WorkflowPaused, None);
        push.send(wire::encode_event(&event).unwrap()).await.unwrap();

        let handle = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.run().await })
        };

        let published = tokio::time::timeout(Duration::from_secs(5), subscriber.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published, event);

        receiver.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn counts_workflow_shutdowns() {
        let (push, pull) = memory_pipe();
        let bus = EventBus::new(16);
        let mut subscriber = bus.subscribe();
        let receiver = Arc::new(Receiver::new(pull, bus, Duration::from_millis(5)));

        let shutdown = sample_event(EventId::WorkflowShutdown, Some("{}".to_string()));
        push.send(wire::encode_event(&shutdown).unwrap())
            .await
            .unwrap();
        push.send(wire::encode_event(&shutdown).unwrap())
            .await
            .unwrap();

        let handle = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.run().await })
        };
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), subscriber.next())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(receiver.workflows_completed(), 2);

        receiver.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn garbage_envelope_is_discarded() {
        let (push, pull) = memory_pipe();
        let bus = EventBus::new(16);
        let mut subscriber = bus.subscribe();
        let receiver = Arc::new(Receiver::new(pull, bus, Duration::from_millis(5)));

        push.send(b"not an envelope at all".to_vec()).await.unwrap();
        let good = sample_event(EventId::WorkflowResumed, None);
        push.send(wire::encode_event(&good).unwrap()).await.unwrap();

        let handle = {
            let receiver = receiver.clone();
            tokio::spawn(async move { receiver.run().await })
        };

        // Only the valid event comes through.
        let published = tokio::time::timeout(Duration::from_secs(5), subscriber.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(published.id, EventId::WorkflowResumed);

        receiver.stop();
        handle.await.unwrap();
    }
}
