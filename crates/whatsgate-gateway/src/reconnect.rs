//! Forced reconnection after repeated keep-alive failures.

use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::protocol::{ClientError, ProtocolClient};

/// Exponential retry delay, doubling from `floor` up to `ceiling`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// The delay to wait now; the following call returns twice as much, up
    /// to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Disconnect `client`, then retry `connect` until it succeeds, reports an
/// existing connection, or `cancel` fires. Returns whether a connection was
/// established.
pub async fn reconnect_loop(
    client: &dyn ProtocolClient,
    backoff: &Mutex<Backoff>,
    cancel: &CancellationToken,
) -> bool {
    debug!("Forcing reconnection after keep-alive timeouts");
    client.disconnect().await;

    loop {
        if cancel.is_cancelled() {
            return false;
        }

        match client.connect().await {
            Ok(()) | Err(ClientError::AlreadyConnected) => {
                lock(backoff).reset();
                info!("Reconnected after keep-alive timeouts");
                return true;
            }
            Err(e) => {
                let delay = lock(backoff).next_delay();
                error!(error = %e, retry_in = ?delay, "Error reconnecting after keep-alive timeouts");

                tokio::select! {
                    _ = cancel.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

fn lock(backoff: &Mutex<Backoff>) -> std::sync::MutexGuard<'_, Backoff> {
    backoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
