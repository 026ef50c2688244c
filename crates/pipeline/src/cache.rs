//! Optional range cache collaborator

use async_trait::async_trait;

use portal_protocol::{Block, StreamRequest};
use portal_transport::BlockStream;

/// Serves previously fetched sub-ranges without a network round trip.
///
/// When a cache is attached the orchestrator consults it before opening a
/// live stream; `None` falls through to the transport. Implementations
/// typically replay stored deliveries via [`BlockStream::preloaded`].
#[async_trait]
pub trait StreamCache<B: Block>: Send + Sync {
    /// A stream covering `request`, if this cache has it
    async fn get_stream(&self, request: &StreamRequest) -> Option<BlockStream<B>>;
}
