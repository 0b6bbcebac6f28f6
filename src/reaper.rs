use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::time::now_ms;

/// Background task that sends reminders once their time (a day before the
/// appointment) has come.
pub async fn run_reminders(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        remind_due(&engine).await;
    }
}

/// One reminder pass. Returns how many reminders went out.
pub async fn remind_due(engine: &Engine) -> usize {
    let due = engine.collect_due_reminders(now_ms()).await;
    let mut sent = 0;
    for appointment in due {
        match engine.send_reminder(appointment.id).await {
            Ok(true) => {
                info!("sent reminder for {}", appointment.id);
                sent += 1;
            }
            Ok(false) => {}
            Err(e) => {
                // May have been deleted since collection.
                tracing::debug!("reminder skip {}: {e}", appointment.id);
            }
        }
    }
    sent
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted WAL after {appends} appends");
            }
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}
