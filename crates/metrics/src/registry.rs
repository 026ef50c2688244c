//! Instance-owned metric registry
//!
//! Handles are deduplicated on first registration: asking twice for the same
//! name returns the same underlying atomic, so independent components can
//! share a metric without coordinating.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

/// Monotonic counter handle
#[derive(Debug, Clone)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-value gauge handle
#[derive(Debug, Clone)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    #[inline]
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Count/sum/min/max histogram handle
#[derive(Debug, Clone, Default)]
pub struct Histogram(Arc<HistogramInner>);

#[derive(Debug)]
struct HistogramInner {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for HistogramInner {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            // Starts above any observation so fetch_min works
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    /// Record one observation
    pub fn observe(&self, value: u64) {
        let inner = &self.0;
        inner.count.fetch_add(1, Ordering::Relaxed);
        inner.sum.fetch_add(value, Ordering::Relaxed);
        inner.min.fetch_min(value, Ordering::Relaxed);
        inner.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Point-in-time view
    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = &self.0;
        let count = inner.count.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            sum: inner.sum.load(Ordering::Relaxed),
            min: if count == 0 {
                0
            } else {
                inner.min.load(Ordering::Relaxed)
            },
            max: inner.max.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time histogram view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

#[derive(Default)]
struct Registered {
    counters: BTreeMap<String, Counter>,
    gauges: BTreeMap<String, Gauge>,
    histograms: BTreeMap<String, Histogram>,
}

/// Registry of named metric handles owned by one pipeline instance.
///
/// Cloning shares the instance. [`MetricsRegistry::disabled`] hands out
/// working but unregistered handles, so code that records metrics needs no
/// branches for the no-metrics case.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Option<Arc<Mutex<Registered>>>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl MetricsRegistry {
    /// Create an active registry
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(Registered::default()))),
        }
    }

    /// Create a no-op registry: handles work, nothing is retained
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Whether this registry retains anything
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Counter handle for `name`, created on first use
    pub fn counter(&self, name: &str) -> Counter {
        match &self.inner {
            Some(inner) => inner
                .lock()
                .counters
                .entry(name.to_owned())
                .or_insert_with(|| Counter(Arc::new(AtomicU64::new(0))))
                .clone(),
            None => Counter(Arc::new(AtomicU64::new(0))),
        }
    }

    /// Gauge handle for `name`, created on first use
    pub fn gauge(&self, name: &str) -> Gauge {
        match &self.inner {
            Some(inner) => inner
                .lock()
                .gauges
                .entry(name.to_owned())
                .or_insert_with(|| Gauge(Arc::new(AtomicU64::new(0))))
                .clone(),
            None => Gauge(Arc::new(AtomicU64::new(0))),
        }
    }

    /// Histogram handle for `name`, created on first use
    pub fn histogram(&self, name: &str) -> Histogram {
        match &self.inner {
            Some(inner) => inner
                .lock()
                .histograms
                .entry(name.to_owned())
                .or_insert_with(Histogram::default)
                .clone(),
            None => Histogram::default(),
        }
    }

    /// Snapshot every registered metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        match &self.inner {
            Some(inner) => {
                let registered = inner.lock();
                MetricsSnapshot {
                    counters: registered
                        .counters
                        .iter()
                        .map(|(name, c)| (name.clone(), c.get()))
                        .collect(),
                    gauges: registered
                        .gauges
                        .iter()
                        .map(|(name, g)| (name.clone(), g.get()))
                        .collect(),
                    histograms: registered
                        .histograms
                        .iter()
                        .map(|(name, h)| (name.clone(), h.snapshot()))
                        .collect(),
                }
            }
            None => MetricsSnapshot::default(),
        }
    }
}

/// Point-in-time view of every registered metric
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}
