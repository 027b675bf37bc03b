use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::execution_host::{ExecutionHost, HostError};
use crate::application::retry::RetryPolicy;
use crate::domain::entities::UiMessage;

/// A run that stayed up this long resets the backoff.
const HEALTHY_RUN: Duration = Duration::from_secs(10 * 60);

/// Restarts the execution host after failures, with `min(max, 1s · 2^n)` backoff plus jitter.
pub struct Supervisor {
    host: ExecutionHost,
    backoff: RetryPolicy,
}

impl Supervisor {
    pub fn new(host: ExecutionHost, max_backoff: Duration) -> Self {
        Self {
            host,
            backoff: RetryPolicy::restart(max_backoff),
        }
    }

    pub fn host(&self) -> &ExecutionHost {
        &self.host
    }

    /// Runs until a clean shutdown. Only `AlreadyRunning` is returned as an error:
    /// restarting cannot fix another process holding the lock.
    pub async fn run(
        &self,
        wake: &mut mpsc::UnboundedReceiver<UiMessage>,
        shutdown: CancellationToken,
    ) -> Result<(), HostError> {
        let mut restarts: u32 = 0;

        loop {
            let started = Instant::now();
            match self.host.run(wake, shutdown.clone()).await {
                Ok(()) => return Ok(()),
                Err(e @ HostError::AlreadyRunning(_)) => return Err(e),
                Err(e) => {
                    if shutdown.is_cancelled() {
                        return Ok(());
                    }
                    if started.elapsed() >= HEALTHY_RUN {
                        restarts = 0;
                    }
                    let delay = self.backoff.backoff_with_jitter(restarts);
                    restarts = restarts.saturating_add(1);
                    error!("Host failed: {}. Restart #{} in {:?}", e, restarts, delay);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            info!("Restarting execution host");
                        }
                        _ = shutdown.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }
}
