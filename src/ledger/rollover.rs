use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::SharedLedger;

/// Polls for a local date change every `every` (at most a minute in practice).
pub fn spawn_rollover(ledger: SharedLedger, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let mut guard = ledger.lock().await;
            match guard.check_rollover().await {
                Ok(Some(date)) => info!(%date, "today view reset for new day"),
                Ok(None) => {}
                Err(e) => error!(error = %e, "day rollover check failed"),
            }
        }
    })
}
