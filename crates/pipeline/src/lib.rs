//! Portal - Pipeline
//!
//! The orchestration layer: pulls block batches from the portal transport,
//! runs them through a transformer tree and writes the result to a target,
//! resolving chain reorganizations along the way.
//!
//! ```text
//! [QueryBuilder]      [PortalClient]      [Transformer]      [Target]
//!     ranges    --->    BlockStream  --->   transform   --->  write
//!                            |                                  |
//!                       fork signal  ----->  fork point  <------+
//! ```
//!
//! # Key design
//!
//! - **One stream of control**: a single task pulls, transforms and writes;
//!   only the HTTP request and buffer timers run in the background.
//! - **Fork recovery is target-driven**: the target owns the persisted
//!   rollback chain and resolves the portal's `previous_blocks` against it;
//!   the orchestrator only coordinates.
//! - **Scoped cleanup**: transformer `stop` hooks and the metrics reporter
//!   shut down on every exit path, error or not.
//! - **Deterministic order**: batches are yielded in ascending block order
//!   per sub-range, sub-ranges in calculator order.

mod cache;
mod error;
mod memory;
mod query;
mod source;
mod target;

pub use cache::StreamCache;
pub use error::PipelineError;
pub use memory::InMemoryTarget;
pub use query::{BlockRangeQuery, QueryBuilder, RangeBound, RangeRequest};
pub use source::{PipelineBatch, PortalSource};
pub use target::{CursorRecord, Target};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
