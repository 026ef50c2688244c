//! Hierarchical profiling spans
//!
//! Times pipeline stages. Span names nest with `/` so one batch reads as
//! `batch/transform/decode-logs` in the recorded timings. The disabled
//! profiler implements the same surface without taking the clock or
//! allocating.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[cfg(test)]
#[path = "profiler_test.rs"]
mod tests;

struct Recorder {
    timings: Mutex<Vec<(String, Duration)>>,
}

/// Span factory. Cloning shares the recorder.
#[derive(Clone, Default)]
pub struct Profiler {
    recorder: Option<Arc<Recorder>>,
}

impl Profiler {
    /// Create an enabled profiler
    pub fn enabled() -> Self {
        Self {
            recorder: Some(Arc::new(Recorder {
                timings: Mutex::new(Vec::new()),
            })),
        }
    }

    /// Create a disabled profiler; every operation is a no-op
    pub fn noop() -> Self {
        Self { recorder: None }
    }

    /// Whether spans are being recorded
    pub fn is_enabled(&self) -> bool {
        self.recorder.is_some()
    }

    /// Start a root span
    pub fn span(&self, name: &str) -> Span {
        Span::start(self.clone(), name.to_owned())
    }

    /// Time a future under `name`
    pub async fn measure<F: std::future::Future>(&self, name: &str, fut: F) -> F::Output {
        let span = self.span(name);
        let out = fut.await;
        span.end();
        out
    }

    /// Recorded `(name, duration)` pairs, in completion order
    pub fn timings(&self) -> Vec<(String, Duration)> {
        match &self.recorder {
            Some(recorder) => recorder.timings.lock().clone(),
            None => Vec::new(),
        }
    }

    /// Drop all recorded timings
    pub fn reset(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.timings.lock().clear();
        }
    }

    fn record(&self, name: String, elapsed: Duration) {
        if let Some(recorder) = &self.recorder {
            recorder.timings.lock().push((name, elapsed));
        }
    }
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// One running span. Ends on [`Span::end`] or on drop.
pub struct Span {
    profiler: Profiler,
    name: String,
    started: Option<Instant>,
    ended: bool,
}

impl Span {
    fn start(profiler: Profiler, name: String) -> Self {
        let started = profiler.is_enabled().then(Instant::now);
        Self {
            profiler,
            name,
            started,
            ended: false,
        }
    }

    /// Start a child span named `parent/name`
    pub fn child(&self, name: &str) -> Span {
        Span::start(self.profiler.clone(), format!("{}/{}", self.name, name))
    }

    /// End the span, recording its duration
    pub fn end(mut self) -> Option<Duration> {
        self.finish()
    }

    fn finish(&mut self) -> Option<Duration> {
        if self.ended {
            return None;
        }
        self.ended = true;
        let elapsed = self.started?.elapsed();
        self.profiler
            .record(std::mem::take(&mut self.name), elapsed);
        Some(elapsed)
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.finish();
    }
}
