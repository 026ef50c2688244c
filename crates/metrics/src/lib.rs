//! Portal - Metrics
//!
//! Observability for the ingestion engine: an instance-owned metric
//! registry, a sliding-window progress tracker and a hierarchical profiler.
//!
//! # Design
//!
//! - **No global state**: every registry is an owned instance passed by
//!   handle, so multiple pipelines in one process never collide.
//! - **Lock-free hot path**: metric handles are `Arc<AtomicU64>` wrappers;
//!   the registry lock is touched only at registration and snapshot time.
//! - **Safe no-op**: a disabled registry and a disabled profiler implement
//!   the same surface at effectively zero cost.
//! - **Off the hot path**: the progress tracker and reporter only consume
//!   snapshots; they never sit between the transport and the consumer.

mod progress;
mod profiler;
mod registry;
mod reporter;

pub use progress::{ProgressSnapshot, ProgressTracker};
pub use profiler::{Profiler, Span};
pub use registry::{Counter, Gauge, Histogram, HistogramSnapshot, MetricsRegistry, MetricsSnapshot};
pub use reporter::{Reporter, DEFAULT_REPORT_INTERVAL};
