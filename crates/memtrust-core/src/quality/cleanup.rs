//! Background cleanup of the quality score table.
//!
//! The task only runs when started explicitly and stops when its token is
//! cancelled, so tests can leave it off or drive [`run_once`] directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::QualityMetrics;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// One cleanup pass. Returns the ids dropped from the table.
pub fn run_once(metrics: &QualityMetrics) -> Vec<String> {
    let removed = metrics.cleanup_low_quality();
    debug!(removed = removed.len(), "quality cleanup pass complete");
    removed
}

/// Handle to a running cleanup loop.
pub struct CleanupTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Spawn a loop that runs [`run_once`] every `interval` until `cancel`
    /// (or [`stop`](Self::stop)) fires.
    pub fn start(metrics: Arc<QualityMetrics>, interval: Duration, cancel: CancellationToken) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let token = cancel.child_token();
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "quality cleanup task started");
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        info!("quality cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        run_once(&metrics);
                    }
                }
            }
        });

        Self {
            cancel: token,
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "quality cleanup task ended abnormally");
        }
    }
}
