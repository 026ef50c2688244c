//! Portal - Transport
//!
//! Turns a chunked HTTP response from the portal into an ordered pull
//! sequence of block batches.
//!
//! # Architecture
//!
//! ```text
//! [Portal HTTP] --chunks--> [LineSplitter] --blocks--> [StreamBuffer] --take()--> [Consumer]
//!       ^                                                    |
//!       └------ resume cursor advanced per parsed block -----┘
//! ```
//!
//! # Key Design
//!
//! - **One in-flight request**: a [`PortalClient::stream`] call owns exactly
//!   one HTTP request at a time; the buffer's producer/consumer decoupling is
//!   what lets the consumer process one batch while the next response is
//!   already streaming.
//! - **Exact resume**: the request's `fromBlock`/`parentBlockHash` advance
//!   after every parsed block, so a transient retry re-requests nothing that
//!   was already delivered.
//! - **Fork as control flow**: a stale-range response is surfaced as
//!   [`TransportError::Fork`] after any buffered data has been delivered; it
//!   is never swallowed here.
//! - **Single cancellation signal**: buffer waits, the response body read and
//!   head-poll sleeps all observe one `CancellationToken`.

mod buffer;
mod client;
mod config;
mod error;
mod lines;

pub use buffer::StreamBuffer;
pub use client::{BlockStream, PortalClient};
pub use config::{BufferConfig, PortalStreamConfig, RetryConfig};
pub use error::TransportError;
pub use lines::LineSplitter;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
