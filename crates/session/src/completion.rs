use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::events::CompletionTrigger;

/// Single-assignment end-of-turn signal.
///
/// Any thread may call [`resolve`](Self::resolve); the first call delivers its
/// trigger to the receiver and every later call reports that it lost.
#[derive(Debug)]
pub struct TurnCompletion {
    sender: Mutex<Option<oneshot::Sender<CompletionTrigger>>>,
}

impl TurnCompletion {
    pub fn new() -> (Self, oneshot::Receiver<CompletionTrigger>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Returns `true` when this call settled the turn.
    pub fn resolve(&self, trigger: CompletionTrigger) -> bool {
        let sender = self
            .sender
            .lock()
            .expect("turn completion mutex poisoned")
            .take();
        match sender {
            Some(sender) => {
                tracing::debug!(?trigger, "Turn completion resolved");
                // The receiver may already be gone when the turn aborted.
                let _ = sender.send(trigger);
                true
            }
            None => {
                tracing::debug!(?trigger, "Turn already completed, ignoring trigger");
                false
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender
            .lock()
            .expect("turn completion mutex poisoned")
            .is_none()
    }
}
