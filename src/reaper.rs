use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that expires confirmed reservations nobody showed up
/// for and re-persists statuses that drifted with the clock.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let now = engine.now_ms();
        let overdue = engine.collect_overdue(now);
        for (reservation_id, _space_id) in overdue {
            match engine.mark_no_show(reservation_id).await {
                Ok(()) => info!("swept no-show reservation {reservation_id}"),
                Err(e) => {
                    // May have checked in or been cancelled since the scan
                    debug!("sweeper skip {reservation_id}: {e}");
                }
            }
        }
        let drifted = engine.reproject_spaces().await;
        if drifted > 0 {
            debug!("reprojected {drifted} drifted space statuses");
        }
    }
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}
