//! Range calculation collaborator
//!
//! The orchestrator does not know how to shape chain-specific requests; a
//! [`QueryBuilder`] supplies the sub-ranges to fetch and the request body
//! for each. The orchestrator treats both opaquely.

use portal_protocol::BlockCursor;
use serde_json::Value;

#[cfg(test)]
#[path = "query_test.rs"]
mod tests;

/// Position already covered by persisted state, excluded from calculation
#[derive(Debug, Clone, Default)]
pub struct RangeBound {
    /// Last block successfully written, when resuming
    pub resume: Option<BlockCursor>,
}

/// One sub-range to request and the body to request it with
#[derive(Debug, Clone)]
pub struct RangeRequest {
    /// Inclusive `(from, to)`; `None` means unbounded (follow the head)
    pub range: (u64, Option<u64>),

    /// Request body for this sub-range, minus the range fields the
    /// transport fills in
    pub request: Value,
}

/// Chain-specific request shaping
pub trait QueryBuilder: Send + Sync {
    /// Sub-ranges still to request, in the order they must be processed.
    /// Empty means the bound already covers everything.
    fn calculate_ranges(&self, bound: &RangeBound) -> Vec<RangeRequest>;

    /// Dataset identifier, for logging
    fn dataset_kind(&self) -> &str;

    /// Field selection merged into every request body
    fn fields(&self) -> Value;
}

/// A single contiguous block range with a fixed request body.
///
/// Covers the common case of one dataset over one range; anything fancier
/// (chunking, per-range bodies) implements [`QueryBuilder`] directly.
#[derive(Debug, Clone)]
pub struct BlockRangeQuery {
    from_block: u64,
    to_block: Option<u64>,
    kind: String,
    fields: Value,
    request: Value,
}

impl BlockRangeQuery {
    pub fn new(kind: impl Into<String>, from_block: u64) -> Self {
        Self {
            from_block,
            to_block: None,
            kind: kind.into(),
            fields: Value::Null,
            request: Value::Null,
        }
    }

    /// Bound the range; without this the stream follows the chain head
    pub fn to_block(mut self, to_block: u64) -> Self {
        self.to_block = Some(to_block);
        self
    }

    /// Field selection for every request
    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = fields;
        self
    }

    /// Extra request body entries (filters etc.)
    pub fn with_request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }
}

impl QueryBuilder for BlockRangeQuery {
    fn calculate_ranges(&self, bound: &RangeBound) -> Vec<RangeRequest> {
        let from = match &bound.resume {
            Some(cursor) => (cursor.number + 1).max(self.from_block),
            None => self.from_block,
        };
        if let Some(to) = self.to_block {
            if from > to {
                return Vec::new();
            }
        }
        vec![RangeRequest {
            range: (from, self.to_block),
            request: self.request.clone(),
        }]
    }

    fn dataset_kind(&self) -> &str {
        &self.kind
    }

    fn fields(&self) -> Value {
        self.fields.clone()
    }
}
