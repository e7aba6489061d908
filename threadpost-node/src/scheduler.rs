//! Background flush task for the outbox.
//!
//! Flushes on a fixed interval, and right away whenever the trigger is
//! notified (for example after connectivity changes).

use crate::config::OutboxConfig;
use crate::outbox::Outbox;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::interval;

/// Spawn a background flush task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_flush_task(
    outbox: Arc<Outbox>,
    config: OutboxConfig,
    trigger: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.flush_enabled {
            tracing::info!("Flush task disabled");
            return;
        }

        let interval_secs = config.flush_interval_secs.max(1);
        tracing::info!("Flush task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = trigger.notified() => {
                    tracing::debug!("Flush triggered");
                }
            }

            let report = outbox.flush().await;
            if report.pending > 0 {
                tracing::debug!("Flush: {} messages still queued", report.pending);
            }
        }
    })
}
