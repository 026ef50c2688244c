//! Portal - Protocol
//!
//! Shared data model for the portal streaming ingestion engine.
//!
//! # Overview
//!
//! The portal serves chain blocks over HTTP as newline-delimited JSON. This
//! crate defines the types every other crate agrees on:
//!
//! - [`BlockCursor`] / [`BlockRef`] - points in the chain, used as resume
//!   cursors and head pointers
//! - [`Block`] - the trait a decoded block type must implement so the
//!   transport can track its position while streaming
//! - [`BlockBatch`] - one accumulated delivery unit handed to the consumer
//! - [`StreamRequest`] - the logical range request sent to the portal
//!
//! # Design
//!
//! - **Engine-opaque blocks**: the engine never inspects block contents
//!   beyond `number`/`hash`/`timestamp`; everything else belongs to the
//!   deployment's decoders.
//! - **Fork equality**: cursors compare `(number, hash)` for fork
//!   resolution; a cursor without a hash matches on number alone.

mod batch;
mod cursor;
mod error;
mod request;

pub use batch::{Block, BlockBatch, BlockHeader};
pub use cursor::{BlockCursor, BlockRef};
pub use error::ProtocolError;
pub use request::StreamRequest;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
