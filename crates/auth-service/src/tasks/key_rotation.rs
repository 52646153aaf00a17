//! Signing key rotation background task.
//!
//! On every tick the task runs one rotation pass and prunes revocation
//! entries for tokens that have expired.
//!
//! # Graceful Shutdown
//!
//! The task stops when its cancellation token is cancelled. A pass already
//! in progress finishes first.

use crate::services::token_service::{RotationOutcome, TokenService};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Handle to the running rotation task.
pub struct RotationTaskHandle {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RotationTaskHandle {
    /// Cancel the task and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(
                target: "auth.task.key_rotation",
                error = %e,
                "Key rotation task ended abnormally"
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn [`run_key_rotation`] on the current runtime.
pub fn spawn_key_rotation(service: Arc<TokenService>, interval: Duration) -> RotationTaskHandle {
    let cancel_token = CancellationToken::new();
    let handle = tokio::spawn(run_key_rotation(service, interval, cancel_token.clone()));
    RotationTaskHandle {
        cancel_token,
        handle,
    }
}

/// Run rotation passes every `interval` until cancelled.
///
/// The first pass happens one full interval after start; startup has
/// already run one.
#[instrument(skip_all, name = "auth.task.key_rotation")]
pub async fn run_key_rotation(
    service: Arc<TokenService>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "auth.task.key_rotation",
        interval_seconds = interval.as_secs(),
        "Starting key rotation task"
    );

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_rotation_tick(&service).await;
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "auth.task.key_rotation",
                    "Key rotation task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "auth.task.key_rotation", "Key rotation task stopped");
}

/// One tick of the rotation task. Errors are logged; the next tick retries.
pub(crate) async fn run_rotation_tick(service: &TokenService) {
    match service.rotate().await {
        Ok(RotationOutcome::Rotated { key_id }) => {
            info!(
                target: "auth.task.key_rotation",
                key_id = %key_id,
                "Signing key rotated"
            );
        }
        Ok(outcome) => {
            tracing::debug!(
                target: "auth.task.key_rotation",
                outcome = ?outcome,
                "No key rotation performed"
            );
        }
        Err(e) => {
            tracing::error!(
                target: "auth.task.key_rotation",
                error = %e,
                "Failed to rotate keys"
            );
        }
    }

    service.prune_revocations(Utc::now());
}
