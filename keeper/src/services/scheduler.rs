//! Periodic rebalance loop

use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{info, warn};
use vault_orchestrator::Ledger;

use crate::routes::SharedOrchestrator;

/// One scheduled pass: reload, then rebalance with the vault's own weights.
/// Returns the number of confirmed batches.
pub async fn run_once<L: Ledger>(orchestrator: &SharedOrchestrator<L>) -> usize {
    let mut orchestrator = orchestrator.lock().await;

    if let Err(err) = orchestrator.reload().await {
        warn!(error = %err, "Scheduled reload failed");
        return 0;
    }

    match orchestrator.rebalance(None).await {
        Ok(confirmed) => {
            if !confirmed.is_empty() {
                info!(
                    batches = confirmed.len(),
                    total_value = orchestrator.total_value(),
                    "Scheduled rebalance confirmed"
                );
            }
            confirmed.len()
        }
        Err(err) => {
            warn!(
                error = %err.source,
                kind = ?err.kind(),
                confirmed = err.confirmed.len(),
                "Scheduled rebalance failed"
            );
            err.confirmed.len()
        }
    }
}

/// Runs [`run_once`] every `interval`. A tick that comes due while a pass is
/// still running is skipped rather than queued.
pub fn spawn_rebalance_loop<L: Ledger + 'static>(
    orchestrator: SharedOrchestrator<L>,
    interval: Duration,
) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "Starting rebalance loop");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_once(&orchestrator).await;
        }
    })
}
