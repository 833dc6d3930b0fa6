// Jaskier Shared Pattern — watchdog
//
// Periodically checks fleet health and performs auto-recovery:
// - pings every registered node (refreshes status/metadata, trips/resets breakers)
// - sweeps expired cache entries
// - logs health status for external monitoring

use std::time::Duration;

use crate::state::AppState;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("watchdog: started (interval={}s)", CHECK_INTERVAL.as_secs());

        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;

            let (healthy, total) = ping_nodes(&state).await;
            let expired = state.cache.clean_expired();
            let open_breakers = state.breakers.open_count();

            if healthy == total && open_breakers == 0 {
                tracing::debug!(
                    "watchdog: all checks passed ({}/{} nodes healthy, {} cache entries swept)",
                    healthy, total, expired
                );
            } else {
                tracing::warn!(
                    "watchdog: {}/{} nodes healthy, {} breakers open, {} cache entries swept",
                    healthy, total, open_breakers, expired
                );
            }
        }
    })
}

async fn ping_nodes(state: &AppState) -> (usize, usize) {
    let results = state.registry.ping_all().await;
    let total = results.len();
    let healthy = results.iter().filter(|r| **r).count();
    (healthy, total)
}
