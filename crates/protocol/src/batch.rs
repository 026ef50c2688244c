//! Block batches - the delivery unit handed to the consumer

use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cursor::{BlockCursor, BlockRef};

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;

/// The engine's view of a decoded block.
///
/// The transport parses each JSONL line into the deployment's block type and
/// only needs the position fields to advance its cursor; everything else in
/// the block is opaque payload for the transformer chain.
pub trait Block: DeserializeOwned + Send + Sync + 'static {
    /// Block height
    fn number(&self) -> u64;

    /// Block hash
    fn hash(&self) -> &str;

    /// Block timestamp in seconds, when the chain kind exposes one
    fn timestamp(&self) -> Option<u64> {
        None
    }

    /// Cursor identifying this block
    fn cursor(&self) -> BlockCursor {
        BlockCursor {
            number: self.number(),
            hash: Some(self.hash().to_owned()),
            timestamp: self.timestamp(),
        }
    }
}

/// Minimal block carrying only its header fields.
///
/// Sparse field projections can deserialize into this directly; richer block
/// types embed the same fields and implement [`Block`] themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Block for BlockHeader {
    fn number(&self) -> u64 {
        self.number
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }
}

/// One accumulated delivery unit.
///
/// Invariant: `blocks` is ordered by ascending block number with no gaps
/// introduced within a single delivery; gaps across deliveries are permitted
/// (sparse projections) but the sequence stays monotonic.
#[derive(Debug)]
pub struct BlockBatch<B> {
    /// Blocks in ascending order
    pub blocks: Vec<B>,

    /// Finalized head as most recently reported by the portal
    pub finalized_head: Option<BlockRef>,

    /// Bytes of raw line data this batch accumulated
    pub bytes: u64,

    /// When the most recent block (or head report) arrived
    pub last_block_received_at: Instant,
}

impl<B> BlockBatch<B> {
    /// Create an empty batch
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            finalized_head: None,
            bytes: 0,
            last_block_received_at: Instant::now(),
        }
    }

    /// Number of blocks in this delivery
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether this delivery carries no blocks (head-only flush)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<B: Block> BlockBatch<B> {
    /// Cursor of the first block, if any
    pub fn first_cursor(&self) -> Option<BlockCursor> {
        self.blocks.first().map(Block::cursor)
    }

    /// Cursor of the last block, if any
    pub fn last_cursor(&self) -> Option<BlockCursor> {
        self.blocks.last().map(Block::cursor)
    }
}

impl<B> Default for BlockBatch<B> {
    fn default() -> Self {
        Self::new()
    }
}
