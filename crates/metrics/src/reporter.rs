//! Periodic progress reporting
//!
//! A background task logging a progress/metrics snapshot at a fixed
//! interval. Diagnostics only; nothing reads these logs for control flow.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::progress::ProgressTracker;
use crate::registry::MetricsRegistry;

#[cfg(test)]
#[path = "reporter_test.rs"]
mod tests;

/// Interval used by [`Reporter::new`]
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Logs pipeline progress until stopped.
pub struct Reporter {
    registry: MetricsRegistry,
    progress: ProgressTracker,
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Create a reporter with the default interval
    pub fn new(registry: MetricsRegistry, progress: ProgressTracker) -> Self {
        Self::with_interval(registry, progress, DEFAULT_REPORT_INTERVAL)
    }

    /// Create a reporter with an explicit interval
    pub fn with_interval(
        registry: MetricsRegistry,
        progress: ProgressTracker,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            progress,
            interval,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Whether the background task is running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the reporting task. Starting twice is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let registry = self.registry.clone();
        let progress = self.progress.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => report(&registry, &progress),
                    _ = cancel.cancelled() => break,
                }
            }
        }));
    }

    /// Stop the reporting task and log a final snapshot
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        report(&self.registry, &self.progress);
    }
}

fn report(registry: &MetricsRegistry, progress: &ProgressTracker) {
    let snap = progress.snapshot();
    let metrics = registry.snapshot();
    info!(
        current_block = snap.current_block,
        target_block = snap.target_block,
        blocks_per_sec = format!("{:.1}", snap.blocks_per_sec),
        bytes_per_sec = format!("{:.0}", snap.bytes_per_sec),
        percent = snap.percent.map(|p| format!("{:.1}", p)),
        eta_secs = snap.eta.map(|d| d.as_secs()),
        counters = ?metrics.counters,
        "ingestion progress"
    );
}
