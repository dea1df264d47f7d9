use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use accord_engine::Engine;

/// Background task that drives periodic maintenance.
///
/// Ticks on an interval and knocks on the engine's maintenance gate. The gate
/// itself is throttled in the database, so running several servers against one
/// database still sweeps once per interval.
pub async fn run_sweep_loop(engine: Arc<Engine>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let gate_interval = chrono::Duration::seconds(interval_secs as i64);

    loop {
        interval.tick().await;

        let engine = engine.clone();
        let result = tokio::task::spawn_blocking(move || {
            engine.scheduler().run_maintenance_if_due(gate_interval)
        })
        .await;

        match result {
            Ok(Ok(Some(report))) => {
                if report.rooms_closed > 0 || report.matches_expired > 0 {
                    info!(
                        "Sweep: closed {} rooms, expired {} proposals",
                        report.rooms_closed, report.matches_expired
                    );
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Sweep error: {}", e),
            Err(e) => warn!("Sweep task failed: {}", e),
        }
    }
}
