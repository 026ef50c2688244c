//! Target contract
//!
//! The write side of the pipeline. A target persists transformed batches
//! together with the resume cursor and the rollback chain that was active
//! when the cursor was saved; that stored chain is what makes fork recovery
//! possible after a restart.

use async_trait::async_trait;

use portal_protocol::BlockCursor;

use crate::source::PipelineBatch;
use crate::Result;

/// Persisted resume state, one record per logical stream
#[derive(Debug, Clone)]
pub struct CursorRecord {
    /// Last block successfully written
    pub current: BlockCursor,

    /// Finalized head observed when the cursor was saved
    pub finalized: Option<BlockCursor>,

    /// Blocks above the finalized head at save time, oldest first
    pub rollback_chain: Vec<BlockCursor>,
}

/// Where transformed batches go.
///
/// `write` must persist the batch data and the cursor state from
/// `batch.ctx` atomically enough that a restart resumes without duplicating
/// or skipping blocks.
#[async_trait]
pub trait Target<Out>: Send + Sync
where
    Out: Send + 'static,
{
    /// Load the persisted resume state, if any
    async fn cursor(&self) -> Result<Option<CursorRecord>>;

    /// Persist one transformed batch
    async fn write(&self, batch: PipelineBatch<Out>) -> Result<()>;

    /// Whether [`Target::fork`] is implemented.
    ///
    /// Returning `false` makes any fork fatal; correct for append-only
    /// targets that cannot retract rows.
    fn supports_fork(&self) -> bool {
        false
    }

    /// Resolve a fork against the stored rollback chain.
    ///
    /// Walk the stored chain newest to oldest; the first stored block that
    /// also appears in `previous_blocks` (same number and hash) is the fork
    /// point. When the walk exhausts without a match, fall back to the
    /// oldest stored block still above the last known finalized head, or
    /// return `None` when even that would roll back past finalization.
    ///
    /// Implementations must also retract any persisted data above the
    /// returned cursor before returning it.
    async fn fork(&self, previous_blocks: &[BlockCursor]) -> Result<Option<BlockCursor>> {
        let _ = previous_blocks;
        Ok(None)
    }
}
