//! Periodic throughput sampling
//!
//! A background task that walks the active jobs on a fixed cadence and asks
//! the supervisor to take a sample. Stopping is cooperative via a
//! cancellation token so shutdown does not wait out the interval.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::services::stream_supervisor::StreamSupervisor;

pub struct ThroughputMonitor {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl ThroughputMonitor {
    /// Spawn the sampling loop
    pub fn spawn(supervisor: StreamSupervisor, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            debug!("Throughput monitor sampling every {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so fresh jobs get a
            // full interval before their first delta
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => supervisor.sample_throughput().await,
                }
            }
        });
        Self { handle, cancel }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
