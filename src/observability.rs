use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Request metrics ─────────────────────────────────────────────

/// Counter: full-day availability views computed.
pub const DAY_VIEWS_TOTAL: &str = "chairtime_day_views_total";

/// Counter: single-slot barber lookups.
pub const SLOT_LOOKUPS_TOTAL: &str = "chairtime_slot_lookups_total";

/// Histogram: time spent resolving availability, in seconds. Labels: view.
pub const RESOLVE_DURATION_SECONDS: &str = "chairtime_resolve_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: appointments written.
pub const BOOKINGS_TOTAL: &str = "chairtime_bookings_total";

/// Counter: policy gate refusals. Labels: reason.
pub const POLICY_REJECTIONS_TOTAL: &str = "chairtime_policy_rejections_total";

/// Counter: chosen barber already busy in the pre-submit snapshot.
pub const BARBER_UNAVAILABLE_TOTAL: &str = "chairtime_barber_unavailable_total";

/// Counter: inserts refused by the sink's overlap check after a stale read.
pub const SUBMISSION_CONFLICTS_TOTAL: &str = "chairtime_submission_conflicts_total";

/// Counter: reads that failed and left availability unknown.
pub const DATA_UNAVAILABLE_TOTAL: &str = "chairtime_data_unavailable_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
