//! Periodic sync job for `serve` mode.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::types::AppState;

/// Syncs all schools every `period`, starting immediately.
///
/// Runs until the task is dropped.
pub async fn run_periodic_sync(state: Arc<AppState>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let reports = state.sync_all().await;
        let failed = reports.iter().filter(|r| !r.success).count();
        info!(
            schools = reports.len(),
            failed,
            next_in_secs = period.as_secs(),
            "Periodic sync finished"
        );
    }
}
