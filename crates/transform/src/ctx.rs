//! Per-batch context passed through the pipeline
//!
//! Built fresh for every batch by the orchestrator and shared with the
//! transformer tree and the target behind an `Arc`; nothing retains it past
//! the batch. Transformers needing cross-batch state keep it themselves.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use portal_metrics::{MetricsRegistry, Profiler};
use portal_protocol::BlockCursor;

/// Chain tips as known by the transport at batch time
#[derive(Debug, Clone, Default)]
pub struct HeadState {
    /// Most recent block the portal guarantees will not reorganize
    pub finalized: Option<BlockCursor>,
    /// Highest block observed on this stream
    pub latest: Option<BlockCursor>,
}

/// Position of the pipeline within the requested range
#[derive(Debug, Clone)]
pub struct RangeState {
    /// First requested block of this run
    pub initial: u64,

    /// Highest known target block, when the range is bounded
    pub last: Option<u64>,

    /// Cursor of the last block in this batch
    pub current: BlockCursor,

    /// Blocks above the finalized head that a reorg could still
    /// invalidate, oldest first. Never contains a block at or below
    /// `HeadState::finalized`.
    pub rollback_chain: Vec<BlockCursor>,
}

/// Byte and request accounting for this batch
#[derive(Debug, Clone)]
pub struct BatchMeta {
    /// Raw bytes accumulated into this batch
    pub bytes: u64,

    /// Deliveries drained so far for the current sub-range, this one
    /// included
    pub deliveries_in_range: u64,

    /// When the last block of this batch arrived
    pub received_at: std::time::Instant,
}

/// The resolved request this batch was served from
#[derive(Debug, Clone, Default)]
pub struct QueryRef {
    /// Stream endpoint URL
    pub url: String,

    /// Stable hash of the request body, for log correlation
    pub content_hash: String,

    /// Raw request body
    pub body: serde_json::Value,
}

impl QueryRef {
    /// Build a reference for a request body sent to `url`
    pub fn new(url: impl Into<String>, body: serde_json::Value) -> Self {
        let mut hasher = DefaultHasher::new();
        body.to_string().hash(&mut hasher);
        Self {
            url: url.into(),
            content_hash: format!("{:016x}", hasher.finish()),
            body,
        }
    }
}

/// Context handed to `transform` once per batch
#[derive(Debug)]
pub struct BatchCtx {
    pub head: HeadState,
    pub state: RangeState,
    pub meta: BatchMeta,
    pub query: QueryRef,
    pub profiler: Profiler,
    pub metrics: MetricsRegistry,
}

/// Context handed to `start` before streaming begins
#[derive(Debug, Clone)]
pub struct StartCtx {
    /// First requested block of this run
    pub initial: u64,
    /// Resume cursor, when continuing from persisted state
    pub current: Option<BlockCursor>,
}
