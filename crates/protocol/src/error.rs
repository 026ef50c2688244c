//! Protocol error types

use thiserror::Error;

/// Errors raised while decoding portal wire data
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A stream line failed to parse as a block
    #[error("invalid block line: {0}")]
    InvalidBlock(#[from] serde_json::Error),

    /// A head header carried an unparseable value
    #[error("invalid head header {name}: {value:?}")]
    InvalidHead { name: &'static str, value: String },

    /// Blocks arrived out of order within one response
    #[error("block {next} arrived after block {prev}")]
    OutOfOrder { prev: u64, next: u64 },
}

impl ProtocolError {
    /// Create an invalid head header error
    pub fn invalid_head(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidHead {
            name,
            value: value.into(),
        }
    }
}
