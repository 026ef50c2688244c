//! Portal - Transform
//!
//! Composable units of work applied to every block batch.
//!
//! # Overview
//!
//! A [`Transformer`] is a node in a tree. Each node exposes five lifecycle
//! hooks and forwards every hook to its children after its own hook
//! completes, in declaration order:
//!
//! - `query` - declare needed fields against the shared [`QueryPlan`]
//! - `start` - initialize resources given the resume cursor
//! - `transform` - map one batch, sequentially, never concurrently
//! - `fork` - discard in-memory state at or above a rollback cursor
//! - `stop` - release resources, on every exit path
//!
//! # Composition
//!
//! ```text
//! decode.pipe(enrich)                  [decode] -> [enrich]           (linear)
//!
//! decode.extend([("logs", a),          [decode] -+-> "logs": [a]
//!                ("txs",  b)])                   +-> "txs":  [b]     (fan-out)
//! ```
//!
//! `pipe` feeds this node's output into the next node. `extend` fans the
//! same input out to named lanes and merges their outputs into one map
//! keyed by lane name. Sibling id collisions get an incrementing numeric
//! suffix, purely for logging and profiling.
//!
//! # Accepted shapes
//!
//! Three shapes are accepted at the boundary and normalized immediately
//! into the one internal node type; the rest of the engine never sees the
//! difference:
//!
//! - a plain async function: [`Transformer::from_fn`]
//! - a hooks bundle: [`Hooks`] via [`Transformer::from_hooks`]
//! - a full [`Transform`] implementation: [`Transformer::new`]

mod ctx;
mod error;
mod fanout;
mod node;
mod plan;

pub use ctx::{BatchCtx, BatchMeta, HeadState, QueryRef, RangeState, StartCtx};
pub use error::TransformError;
pub use fanout::FanOut;
pub use node::{Hooks, Transform, Transformer};
pub use plan::QueryPlan;

use std::future::Future;
use std::pin::Pin;

/// Result type for transformer operations
pub type Result<T> = std::result::Result<T, TransformError>;

/// Boxed future used by normalized transform closures
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
