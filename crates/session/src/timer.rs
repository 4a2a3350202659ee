//! Single-shot cancellable countdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::error::{Result, SessionError};

struct Countdown {
    cancel_tx: Sender<()>,
    pending: Arc<AtomicBool>,
}

/// Runs a callback once after a fixed duration unless stopped first.
///
/// Each `start()` spawns a countdown thread waiting on its own cancel
/// channel. The `pending` flag is claimed exactly once, either by the thread
/// on expiry or by `stop()`, so a callback never starts after `stop()`
/// returns.
pub struct TimerService {
    name: &'static str,
    duration: Duration,
    stack_size: Option<usize>,
    countdown: Mutex<Option<Countdown>>,
}

impl TimerService {
    pub fn new(name: &'static str, duration: Duration) -> Self {
        Self {
            name,
            duration,
            stack_size: None,
            countdown: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Arm the countdown, cancelling any countdown still pending.
    ///
    /// Fails when the countdown thread cannot be spawned; the timer is then
    /// left disarmed.
    pub fn start<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut countdown = self.countdown.lock().expect("timer mutex poisoned");
        if let Some(previous) = countdown.take() {
            Self::cancel(previous);
        }

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let pending = Arc::new(AtomicBool::new(true));
        let thread_pending = pending.clone();
        let duration = self.duration;
        let name = self.name;

        let mut builder = std::thread::Builder::new().name(format!("hark-timer-{name}"));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let spawned = builder.spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(duration) {
                if thread_pending.swap(false, Ordering::AcqRel) {
                    tracing::debug!(timer = name, ?duration, "Timer expired");
                    callback();
                }
            }
        });

        match spawned {
            Ok(_) => {
                tracing::debug!(timer = name, ?duration, "Timer started");
                *countdown = Some(Countdown { cancel_tx, pending });
                Ok(())
            }
            Err(source) => {
                tracing::error!(timer = name, error = %source, "Failed to spawn timer thread");
                Err(SessionError::Timer { name, source })
            }
        }
    }

    /// Cancel a pending countdown. No-op when idle or already expired.
    pub fn stop(&self) {
        let countdown = self.countdown.lock().expect("timer mutex poisoned").take();
        if let Some(countdown) = countdown {
            if countdown.pending.load(Ordering::Acquire) {
                tracing::debug!(timer = self.name, "Timer stopped");
            }
            Self::cancel(countdown);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.countdown
            .lock()
            .expect("timer mutex poisoned")
            .as_ref()
            .is_some_and(|c| c.pending.load(Ordering::Acquire))
    }

    fn cancel(countdown: Countdown) {
        countdown.pending.store(false, Ordering::Release);
        let _ = countdown.cancel_tx.try_send(());
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}
