//! Stream requests - the logical range request sent to the portal

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::batch::Block;

#[cfg(test)]
#[path = "request_test.rs"]
mod tests;

/// A logical range request against the portal stream endpoint.
///
/// The transport advances `from_block`/`parent_block_hash` after every parsed
/// block so that a retry after a transient failure resumes exactly where the
/// previous attempt left off, and so the portal can detect that the client's
/// view of the chain has diverged (the fork signal).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// First block to request (inclusive)
    pub from_block: u64,

    /// Last block to request (inclusive); `None` streams to the head
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_block: Option<u64>,

    /// Hash of the block preceding `from_block`, for fork detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_block_hash: Option<String>,

    /// Chain-specific query body (field selection, filters); opaque here
    #[serde(flatten)]
    pub query: Value,
}

impl StreamRequest {
    /// Create an unbounded request starting at `from_block`
    pub fn from(from_block: u64) -> Self {
        Self {
            from_block,
            to_block: None,
            parent_block_hash: None,
            query: Value::Null,
        }
    }

    /// Bound the request
    pub fn to(mut self, to_block: u64) -> Self {
        self.to_block = Some(to_block);
        self
    }

    /// Set the parent hash used for fork detection
    pub fn parent(mut self, hash: impl Into<String>) -> Self {
        self.parent_block_hash = Some(hash.into());
        self
    }

    /// Attach the chain-specific query body
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    /// Advance past a block just received
    pub fn advance(&mut self, block: &impl Block) {
        self.from_block = block.number() + 1;
        self.parent_block_hash = Some(block.hash().to_owned());
    }

    /// Whether the bounded range has been fully consumed
    pub fn is_exhausted(&self) -> bool {
        matches!(self.to_block, Some(to) if self.from_block > to)
    }

    /// Serialize into the request body sent to the portal.
    ///
    /// The chain-specific query fields are merged at the top level next to
    /// the range fields, matching the portal's wire shape.
    pub fn to_body(&self) -> Value {
        let mut obj = match &self.query {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        obj.insert("fromBlock".into(), self.from_block.into());
        if let Some(to) = self.to_block {
            obj.insert("toBlock".into(), to.into());
        }
        if let Some(hash) = &self.parent_block_hash {
            obj.insert("parentBlockHash".into(), hash.clone().into());
        }
        Value::Object(obj)
    }
}
