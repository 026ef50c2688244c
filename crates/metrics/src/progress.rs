//! Sliding-window progress estimation
//!
//! Derives throughput, percent complete and ETA from periodic samples of the
//! pipeline's position. A pure consumer of state: the hot path only calls
//! [`ProgressTracker::record`], everything else happens at reporting time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;

/// Samples retained by default
const DEFAULT_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    block: u64,
    bytes: u64,
}

struct Window {
    samples: VecDeque<Sample>,
    capacity: usize,
    initial_block: Option<u64>,
    target_block: Option<u64>,
    total_bytes: u64,
}

/// Tracks ingestion progress over a sliding window of samples.
///
/// Cloning shares the tracker.
#[derive(Clone)]
pub struct ProgressTracker {
    window: Arc<Mutex<Window>>,
}

impl ProgressTracker {
    /// Create a tracker with the default window size
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Create a tracker retaining `capacity` samples
    pub fn with_window(capacity: usize) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window {
                samples: VecDeque::with_capacity(capacity.max(2)),
                capacity: capacity.max(2),
                initial_block: None,
                target_block: None,
                total_bytes: 0,
            })),
        }
    }

    /// Declare the range being ingested; `target` is the highest known
    /// target block and may grow as the head advances
    pub fn set_range(&self, initial: u64, target: Option<u64>) {
        let mut window = self.window.lock();
        window.initial_block.get_or_insert(initial);
        if let Some(target) = target {
            let known = window.target_block.get_or_insert(target);
            *known = (*known).max(target);
        }
    }

    /// Record the pipeline position after a processed batch
    pub fn record(&self, block: u64, bytes: u64) {
        let mut window = self.window.lock();
        window.total_bytes += bytes;
        let sample = Sample {
            at: Instant::now(),
            block,
            bytes: window.total_bytes,
        };
        if window.samples.len() == window.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(sample);
    }

    /// Current estimate
    pub fn snapshot(&self) -> ProgressSnapshot {
        let window = self.window.lock();

        let (blocks_per_sec, bytes_per_sec) = match (window.samples.front(), window.samples.back())
        {
            (Some(first), Some(last)) if last.at > first.at => {
                let secs = (last.at - first.at).as_secs_f64();
                (
                    (last.block.saturating_sub(first.block)) as f64 / secs,
                    (last.bytes.saturating_sub(first.bytes)) as f64 / secs,
                )
            }
            _ => (0.0, 0.0),
        };

        let current_block = window.samples.back().map(|s| s.block);

        let (percent, eta) = match (window.initial_block, window.target_block, current_block) {
            (Some(initial), Some(target), Some(current)) if target > initial => {
                let done = current.saturating_sub(initial) as f64;
                let total = (target - initial) as f64;
                let percent = (done / total * 100.0).min(100.0);
                let eta = if blocks_per_sec > 0.0 && current < target {
                    Some(Duration::from_secs_f64(
                        (target - current) as f64 / blocks_per_sec,
                    ))
                } else {
                    None
                };
                (Some(percent), eta)
            }
            _ => (None, None),
        };

        ProgressSnapshot {
            current_block,
            target_block: window.target_block,
            blocks_per_sec,
            bytes_per_sec,
            percent,
            eta,
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time progress estimate
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub current_block: Option<u64>,
    pub target_block: Option<u64>,
    pub blocks_per_sec: f64,
    pub bytes_per_sec: f64,
    /// Percent complete, when the range bound is known
    pub percent: Option<f64>,
    /// Estimated time to reach the target, when derivable
    pub eta: Option<Duration>,
}
