//! Transport error types
//!
//! [`TransportError::Fork`] is control flow rather than failure: it tells the
//! orchestrator that previously delivered blocks are no longer canonical and
//! must never be swallowed below that layer.

use portal_protocol::{BlockCursor, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the portal transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The portal reported that the requested range is stale: the chain
    /// diverged from what was previously delivered
    #[error("chain fork detected requesting block {from_block}")]
    Fork {
        /// Previously delivered segment no longer canonical, oldest first.
        /// Empty means the portal had nothing to reconcile against, which
        /// the orchestrator treats as fatal.
        previous_blocks: Vec<BlockCursor>,
        /// `fromBlock` of the request that triggered the detection
        from_block: u64,
        /// `parentBlockHash` of that request
        parent_block_hash: Option<String>,
    },

    /// HTTP request failed after exhausting the retry budget
    #[error("portal request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// Non-retryable HTTP failure
    #[error("portal request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The portal answered with a status the protocol does not define
    #[error("unexpected portal status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Wire data failed to decode
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The buffer was closed or its failure already consumed
    #[error("stream buffer closed")]
    BufferClosed,

    /// The shared cancellation token fired
    #[error("stream cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether this is the fork signal
    pub fn is_fork(&self) -> bool {
        matches!(self, Self::Fork { .. })
    }

    /// Create an unexpected-status error
    pub fn unexpected_status(status: u16, body: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            status,
            body: body.into(),
        }
    }
}
