//! Background task that keeps the rotator cookie fresh.

use std::sync::Arc;
use std::time::Duration;

use gemini_api::retry::{is_retryable_rotation_status, retry_delay};
use gemini_api::ErrorKind;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialManager;

/// Owns the spawned rotation loop; cancelling the token stops it.
pub(crate) struct RotationHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RotationHandle {
    pub(crate) fn spawn(
        credentials: Arc<CredentialManager>,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let task = tokio::spawn(rotation_loop(credentials, interval, token.clone()));
        tracing::debug!(interval_secs = interval.as_secs(), "rotation task started");
        Self {
            token,
            task: Some(task),
        }
    }

    /// Cancel the loop and wait until it has exited.
    pub(crate) async fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "rotation task ended abnormally");
            }
        }
    }
}

async fn rotation_loop(
    credentials: Arc<CredentialManager>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        rotate_with_backoff(&credentials, interval, &token).await;
    }
    tracing::debug!("rotation task stopped");
}

/// One tick: rotate, backing off on throttling and server faults without
/// running into the next tick.
async fn rotate_with_backoff(
    credentials: &CredentialManager,
    interval: Duration,
    token: &CancellationToken,
) {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = credentials.rotate() => result,
        };

        let error = match result {
            Ok(outcome) => {
                tracing::debug!(?outcome, "rotation tick");
                return;
            }
            Err(error) => error,
        };

        if error.is(ErrorKind::Auth) {
            refresh_stale(credentials).await;
            return;
        }

        if !error.status.is_some_and(is_retryable_rotation_status) {
            tracing::warn!(error = %error, "rotation failed; waiting for next tick");
            return;
        }

        let delay = retry_delay(attempt);
        if started.elapsed() + delay >= interval {
            tracing::warn!(error = %error, "rotation backoff exhausted for this tick");
            return;
        }
        attempt += 1;
        tracing::warn!(
            error = %error,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "rotation throttled; backing off"
        );
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn refresh_stale(credentials: &CredentialManager) {
    if !credentials.can_refresh_externally() {
        tracing::warn!("cookies are stale and no external source is enabled");
        return;
    }
    let epoch = credentials.epoch().await;
    if let Err(error) = credentials.refresh_after_auth(epoch).await {
        tracing::warn!(error = %error, "refresh after stale rotation failed");
    }
}
