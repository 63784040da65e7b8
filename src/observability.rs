use std::net::SocketAddr;

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total lifecycle events applied. Labels: event.
pub const EVENTS_TOTAL: &str = "studyhall_events_total";

/// Counter: reservation attempts rejected by the overlap check.
pub const CONFLICTS_TOTAL: &str = "studyhall_conflicts_total";

/// Counter: reservations expired by the no-show sweep.
pub const NO_SHOWS_TOTAL: &str = "studyhall_no_shows_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered spaces.
pub const SPACES_ACTIVE: &str = "studyhall_spaces_active";

/// Counter: status projection writes that needed a retry.
pub const PROJECTION_RETRIES_TOTAL: &str = "studyhall_projection_retries_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studyhall_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studyhall_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an Event variant to a short label for metrics.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::SpaceRegistered { .. } => "space_registered",
        Event::SpaceUpdated { .. } => "space_updated",
        Event::SpaceRemoved { .. } => "space_removed",
        Event::ReservationCreated { .. } => "reservation_created",
        Event::ReservationModified { .. } => "reservation_modified",
        Event::ReservationCancelled { .. } => "reservation_cancelled",
        Event::CheckedIn { .. } => "checked_in",
        Event::CheckedOut { .. } => "checked_out",
        Event::NoShowMarked { .. } => "no_show_marked",
        Event::StatusProjected { .. } => "status_projected",
        Event::OverrideSet { .. } => "override_set",
        Event::OverrideCleared { .. } => "override_cleared",
    }
}
