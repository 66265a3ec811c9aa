use crate::worker::{SyncWorker, TickOutcome};
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic driver of one worker. Ticks that fall due while a cycle is still running are skipped,
/// not queued.
pub struct Scheduler {
    worker: Arc<SyncWorker>,
}

impl Scheduler {
    pub fn new(worker: Arc<SyncWorker>) -> Self {
        Scheduler { worker }
    }

    /// Runs until `cancel` fires. Cancellation is observed between cycles only, a cycle that has
    /// started always completes.
    pub async fn schedule(&self, cancel: CancellationToken) {
        let chain = self.worker.chain();
        let mut interval = time::interval(self.worker.sync_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            "[{}] Syncing every {:?}",
            chain,
            self.worker.sync_interval()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("[{}] Shutting down worker ...", chain);
                    break;
                }
                _ = interval.tick() => {
                    match self.worker.tick().await {
                        Ok(TickOutcome::Indexed(_)) => {}
                        Ok(outcome) => tracing::debug!("[{}] Tick finished: {:?}", chain, outcome),
                        Err(e) => tracing::error!("[{}] Sync tick failed: {:?}", chain, e),
                    }
                }
            }
        }

        self.worker.stop();
        tracing::info!("[{}] Worker stopped", chain);
    }
}
