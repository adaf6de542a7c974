//! Background maintenance
//!
//! Periodic snapshot flush (in-memory stores only; throttled by the store)
//! and periodic consistency pass. The pass is skipped while an analysis job
//! runs since that job reconciles on start. Cancelling the token stops the
//! loop after one last forced flush.

use cadence_common::config::MaintenanceConfig;
use cadence_common::db::{FlushOutcome, Store};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::consistency;
use crate::services::job_tracker::JobTracker;

pub struct MaintenanceTask {
    store: Store,
    analysis: JobTracker,
    flush_every: Duration,
    reconcile_every: Duration,
}

impl MaintenanceTask {
    pub fn new(store: Store, analysis: JobTracker, config: &MaintenanceConfig) -> Self {
        Self {
            store,
            analysis,
            flush_every: Duration::from_secs(config.flush_interval_secs.max(1)),
            reconcile_every: Duration::from_secs(config.reconcile_interval_secs.max(1)),
        }
    }

    pub fn with_intervals(mut self, flush_every: Duration, reconcile_every: Duration) -> Self {
        self.flush_every = flush_every;
        self.reconcile_every = reconcile_every;
        self
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut flush_tick = tokio::time::interval(self.flush_every);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconcile_tick = tokio::time::interval(self.reconcile_every);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Both intervals fire immediately; skip that first tick
        flush_tick.tick().await;
        reconcile_tick.tick().await;

        tracing::info!(
            flush_every_s = self.flush_every.as_secs(),
            reconcile_every_s = self.reconcile_every.as_secs(),
            in_memory = self.store.is_in_memory(),
            "Maintenance loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = flush_tick.tick() => self.flush(false).await,
                _ = reconcile_tick.tick() => self.reconcile().await,
            }
        }

        self.flush(true).await;
        tracing::info!("Maintenance loop stopped");
    }

    async fn flush(&self, force: bool) {
        match self.store.flush(force).await {
            Ok(FlushOutcome::Flushed { path, elapsed }) => {
                tracing::debug!(
                    snapshot = %path.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    force,
                    "Periodic flush complete"
                );
            }
            Ok(outcome) => tracing::trace!(?outcome, force, "Flush not performed"),
            Err(e) => tracing::error!(error = %e, force, "Snapshot flush failed"),
        }
    }

    async fn reconcile(&self) {
        if self.analysis.is_running() {
            tracing::debug!("Analysis running, consistency pass skipped");
            return;
        }
        if let Err(e) = consistency::reconcile(&self.store).await {
            tracing::error!(error = %e, "Consistency pass failed");
        }
    }
}
