use std::sync::Arc;
use std::time::Duration;

use hark_engine::RecognitionEngine;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Periodically asks the engine to refresh its credentials.
///
/// Runs until stopped or dropped. Failures are logged and retried on the
/// next tick only.
pub struct CredentialRenewer {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CredentialRenewer {
    /// Spawn on the current tokio runtime. The first renewal happens one
    /// `period` after spawning.
    pub fn spawn(engine: Arc<dyn RecognitionEngine>, period: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let cancel = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(?period, engine = engine.name(), "Credential renewal started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.renew_credentials().await {
                            Ok(()) => tracing::debug!("Engine credentials renewed"),
                            Err(e) => tracing::warn!(error = %e, "Credential renewal failed"),
                        }
                    }
                }
            }
            tracing::info!("Credential renewal stopped");
        });

        Self {
            cancel_token,
            handle,
        }
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for CredentialRenewer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
