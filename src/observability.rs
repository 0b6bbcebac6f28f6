use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking activity ────────────────────────────────────────────

/// Counter: appointments booked.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "slotwise_appointments_booked_total";

/// Counter: appointments revised.
pub const APPOINTMENTS_REVISED_TOTAL: &str = "slotwise_appointments_revised_total";

/// Counter: appointments hard-deleted.
pub const APPOINTMENTS_DELETED_TOTAL: &str = "slotwise_appointments_deleted_total";

/// Counter: status changes. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "slotwise_status_changes_total";

/// Counter: broken booking rules. Labels: operation, rule.
pub const VALIDATION_FAILURES_TOTAL: &str = "slotwise_validation_failures_total";

// ── Notices ─────────────────────────────────────────────────────

/// Counter: notices published to the hub. Labels: kind.
pub const NOTICES_PUBLISHED_TOTAL: &str = "slotwise_notices_published_total";

/// Counter: notices that failed delivery or were dropped by a lagging dispatcher.
pub const NOTICES_FAILED_TOTAL: &str = "slotwise_notices_failed_total";

/// Counter: reminders sent.
pub const REMINDERS_SENT_TOTAL: &str = "slotwise_reminders_sent_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotwise_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
