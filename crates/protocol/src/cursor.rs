//! Chain positions: cursors and head references

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "cursor_test.rs"]
mod tests;

/// A point in the chain used as a resume position.
///
/// Equality for fork resolution compares `(number, hash)`. The timestamp is
/// carried for progress estimation only and never participates in identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockCursor {
    /// Block height
    pub number: u64,

    /// Block hash, when the chain kind exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Block timestamp in seconds, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl BlockCursor {
    /// Create a cursor from a bare block number
    pub fn at(number: u64) -> Self {
        Self {
            number,
            hash: None,
            timestamp: None,
        }
    }

    /// Create a cursor with a hash
    pub fn with_hash(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: Some(hash.into()),
            timestamp: None,
        }
    }

    /// Whether two cursors identify the same block.
    ///
    /// Hashes are compared only when both sides carry one; a missing hash
    /// degrades the comparison to block number.
    pub fn same_block(&self, other: &BlockCursor) -> bool {
        if self.number != other.number {
            return false;
        }
        match (&self.hash, &other.hash) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl PartialEq for BlockCursor {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.hash == other.hash
    }
}

impl Eq for BlockCursor {}

impl std::fmt::Display for BlockCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "#{} ({})", self.number, hash),
            None => write!(f, "#{}", self.number),
        }
    }
}

/// A head pointer reported by the portal (finalized or latest).
///
/// Unlike [`BlockCursor`] the hash is mandatory: the portal always knows the
/// hash of its own heads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    /// Block height
    pub number: u64,
    /// Block hash
    pub hash: String,
}

impl BlockRef {
    /// Create a head reference
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }
}

impl From<&BlockRef> for BlockCursor {
    fn from(head: &BlockRef) -> Self {
        BlockCursor::with_hash(head.number, head.hash.clone())
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}
