//! Shared state between the executor task and the control task.
//!
//! Exactly two pieces of state cross the task boundary: the pause flag and
//! the currently-executing step's incoming-data slot. The pause flag is a
//! `tokio::sync::watch` channel so the executor can await un-pause without
//! polling; it is observed only between steps. The trigger slot is a
//! single-writer, single-reader cell installed by the executor for the
//! duration of a trigger wait.

use std::sync::Mutex;

use foreman_types::protocol::TriggerPayload;
use tokio::sync::{mpsc, watch};

/// Per-execution control surface shared with the worker's control task.
#[derive(Debug)]
pub struct ExecutionControls {
    pause: watch::Sender<bool>,
    trigger_slot: Mutex<Option<mpsc::UnboundedSender<TriggerPayload>>>,
}

impl ExecutionControls {
    pub fn new() -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            pause,
            trigger_slot: Mutex::new(None),
        }
    }

    /// Set the pause flag. Takes effect at the executor's next step
    /// boundary, never mid-step.
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    /// Clear the pause flag, waking a paused executor.
    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Subscribe to pause transitions. Used by the executor at its
    /// between-steps suspension point.
    pub(crate) fn pause_signal(&self) -> watch::Receiver<bool> {
        self.pause.subscribe()
    }

    /// Install the incoming-data slot for a step awaiting trigger data.
    /// Returns the receiving end the step suspends on.
    pub(crate) fn begin_trigger_wait(&self) -> mpsc::UnboundedReceiver<TriggerPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut slot) = self.trigger_slot.lock() {
            *slot = Some(tx);
        }
        rx
    }

    /// Clear the incoming-data slot once the step stops waiting.
    pub(crate) fn end_trigger_wait(&self) {
        if let Ok(mut slot) = self.trigger_slot.lock() {
            *slot = None;
        }
    }

    /// Hand a trigger payload to the step currently awaiting one.
    ///
    /// Returns false when no step is waiting; delivery is then a no-op.
    pub fn deliver_trigger(&self, payload: TriggerPayload) -> bool {
        match self.trigger_slot.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(tx) => tx.send(payload).is_ok(),
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl Default for ExecutionControls {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pause_resume_flag() {
        let controls = ExecutionControls::new();
        assert!(!controls.is_paused());
        controls.pause();
        assert!(controls.is_paused());
        controls.resume();
        assert!(!controls.is_paused());
    }

    #[tokio::test]
    async fn test_pause_signal_wakes_on_resume() {
        let controls = std::sync::Arc::new(ExecutionControls::new());
        controls.pause();
        let mut signal = controls.pause_signal();
        assert!(*signal.borrow());

        let waiter = {
            let controls = controls.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                controls.resume();
            })
        };
        signal.wait_for(|paused| !*paused).await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_delivery_reaches_waiting_slot() {
        let controls = ExecutionControls::new();
        assert!(!controls.deliver_trigger(TriggerPayload::default()));

        let mut rx = controls.begin_trigger_wait();
        let payload = TriggerPayload {
            data_in: json!({"alert": "phish"}),
            arguments: vec![],
        };
        assert!(controls.deliver_trigger(payload.clone()));
        assert_eq!(rx.recv().await.unwrap(), payload);

        controls.end_trigger_wait();
        assert!(!controls.deliver_trigger(TriggerPayload::default()));
    }
}
