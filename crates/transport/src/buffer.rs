//! Adaptive stream buffer
//!
//! Decouples the rate at which the transport receives bytes from the rate at
//! which the consumer drains batches, while bounding both latency and memory.
//!
//! # States
//!
//! ```text
//! pending --(min_bytes / idle / flush)--> ready --take()--> pending
//!    |                                                         |
//!    +---------------- close() / fail(err) --------------------+
//! ```
//!
//! # Coordination
//!
//! One producer, one consumer. A `parking_lot::Mutex` guards the state and
//! two `Notify` signals replace polling: `put_signal` wakes the consumer when
//! data arrives or a terminal transition happens, `drained` wakes a producer
//! suspended on backpressure. Each signal has at most one waiter and is
//! re-armed after every `take`. Every suspension also observes the shared
//! cancellation token.

use std::time::Duration;

use parking_lot::Mutex;
use portal_protocol::{BlockBatch, BlockRef};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BufferConfig;
use crate::error::TransportError;
use crate::Result;

#[cfg(test)]
#[path = "buffer_test.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Failed,
}

struct State<B> {
    blocks: Vec<B>,
    finalized_head: Option<BlockRef>,
    bytes: u64,
    ready: bool,
    status: Status,
    /// Stored failure, delivered once after any buffered data
    error: Option<TransportError>,
    /// Timer anchors; `None` when no put / no waiting consumer
    last_put_at: Option<Instant>,
    wait_started_at: Option<Instant>,
    /// Receipt time carried into the next drained batch
    received_at: std::time::Instant,
}

/// Accumulates block deliveries until a size or time threshold is met.
///
/// See the module docs for the state machine. `put` and `take` assume at
/// most one producer and one consumer.
pub struct StreamBuffer<B> {
    config: BufferConfig,
    cancel: CancellationToken,
    state: Mutex<State<B>>,
    put_signal: Notify,
    drained: Notify,
}

enum Step<B> {
    Deliver(BlockBatch<B>),
    End,
    Fail(TransportError),
    Wait(Duration),
}

impl<B: Send> StreamBuffer<B> {
    /// Create a buffer observing the given cancellation token
    pub fn new(config: BufferConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            state: Mutex::new(State {
                blocks: Vec::new(),
                finalized_head: None,
                bytes: 0,
                ready: false,
                status: Status::Open,
                error: None,
                last_put_at: None,
                wait_started_at: None,
                received_at: std::time::Instant::now(),
            }),
            put_signal: Notify::new(),
            drained: Notify::new(),
        }
    }

    /// Merge a delivery into the buffer.
    ///
    /// Marks the buffer ready once `min_bytes` is accumulated and suspends
    /// the caller while `max_bytes` worth of data remains undrained
    /// (backpressure). Resets the idle timer.
    pub async fn put(&self, data: BlockBatch<B>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                return Err(TransportError::BufferClosed);
            }
            if let Some(head) = data.finalized_head {
                state.finalized_head = Some(head);
            }
            state.bytes += data.bytes;
            state.blocks.extend(data.blocks);
            state.last_put_at = Some(Instant::now());
            state.received_at = data.last_block_received_at;
            if state.bytes >= self.config.min_bytes {
                state.ready = true;
            }
            self.put_signal.notify_one();
        }

        // Backpressure: hold the producer until a take drains the buffer
        loop {
            let full = {
                let state = self.state.lock();
                state.status == Status::Open && state.bytes >= self.config.max_bytes()
            };
            if !full {
                return Ok(());
            }
            let drained = self.drained.notified();
            tokio::select! {
                _ = drained => {}
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }
    }

    /// Wait for the next batch.
    ///
    /// Returns when the buffer is ready (by size, idle timeout or explicit
    /// flush), when `max_wait_time` elapses with data accumulated, or when a
    /// terminal transition surfaces. A stored failure is delivered only
    /// after remaining buffered data; `Ok(None)` is clean end-of-stream.
    pub async fn take(&self) -> Result<Option<BlockBatch<B>>> {
        loop {
            let step = self.evaluate();
            match step {
                Step::Deliver(batch) => return Ok(Some(batch)),
                Step::End => return Ok(None),
                Step::Fail(err) => return Err(err),
                Step::Wait(timeout) => {
                    let put = self.put_signal.notified();
                    tokio::select! {
                        _ = put => {}
                        _ = tokio::time::sleep(timeout) => {}
                        _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                    }
                }
            }
        }
    }

    /// Decide what the consumer should do right now
    fn evaluate(&self) -> Step<B> {
        let mut state = self.state.lock();
        let now = Instant::now();

        if state.ready {
            return Step::Deliver(self.drain(&mut state));
        }

        match state.status {
            Status::Failed => {
                // Buffered data is delivered before the stored error
                if !state.blocks.is_empty() {
                    return Step::Deliver(self.drain(&mut state));
                }
                return Step::Fail(
                    state.error.take().unwrap_or(TransportError::BufferClosed),
                );
            }
            Status::Closed => {
                if !state.blocks.is_empty() {
                    return Step::Deliver(self.drain(&mut state));
                }
                return Step::End;
            }
            Status::Open => {}
        }

        let wait_started = *state.wait_started_at.get_or_insert(now);
        let wait_deadline = wait_started + self.config.max_wait_time;

        if now >= wait_deadline {
            if !state.blocks.is_empty() {
                return Step::Deliver(self.drain(&mut state));
            }
            // Nothing accumulated yet: re-arm rather than return empty
            state.wait_started_at = Some(now);
            return Step::Wait(self.config.max_wait_time);
        }

        let mut deadline = wait_deadline;
        if !state.blocks.is_empty() {
            if let Some(last_put) = state.last_put_at {
                let idle_deadline = last_put + self.config.max_idle_time;
                if now >= idle_deadline {
                    return Step::Deliver(self.drain(&mut state));
                }
                deadline = deadline.min(idle_deadline);
            }
        }

        Step::Wait(deadline.saturating_duration_since(now))
    }

    /// Hand out the accumulated batch and reset to pending
    fn drain(&self, state: &mut State<B>) -> BlockBatch<B> {
        let batch = BlockBatch {
            blocks: std::mem::take(&mut state.blocks),
            finalized_head: state.finalized_head.clone(),
            bytes: state.bytes,
            last_block_received_at: state.received_at,
        };
        state.bytes = 0;
        state.ready = false;
        state.last_put_at = None;
        state.wait_started_at = None;
        // Wake exactly one producer suspended on backpressure
        self.drained.notify_one();
        batch
    }

    /// Merge a delivery synchronously, bypassing backpressure.
    ///
    /// Used for replayed (cached) streams that are closed right after
    /// filling; live producers go through `put`.
    pub(crate) fn inject(&self, data: BlockBatch<B>) {
        let mut state = self.state.lock();
        if state.status != Status::Open {
            return;
        }
        if let Some(head) = data.finalized_head {
            state.finalized_head = Some(head);
        }
        state.bytes += data.bytes;
        state.blocks.extend(data.blocks);
        state.received_at = data.last_block_received_at;
        if state.bytes >= self.config.min_bytes {
            state.ready = true;
        }
        self.put_signal.notify_one();
    }

    /// Force the current contents (possibly a head-only, zero-block
    /// delivery) to ready state immediately
    pub fn flush(&self) {
        let mut state = self.state.lock();
        if state.status == Status::Open {
            state.ready = true;
            self.put_signal.notify_one();
        }
    }

    /// Terminal transition: end of stream. Pending data is still delivered.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.status == Status::Open {
            state.status = Status::Closed;
        }
        self.put_signal.notify_one();
        self.drained.notify_one();
    }

    /// Terminal transition: store a failure. Pending data is delivered
    /// first, then the error surfaces on the following `take`.
    pub fn fail(&self, err: TransportError) {
        let mut state = self.state.lock();
        if state.status == Status::Open {
            state.status = Status::Failed;
            state.error = Some(err);
        }
        self.put_signal.notify_one();
        self.drained.notify_one();
    }

    /// Bytes currently buffered
    pub fn buffered_bytes(&self) -> u64 {
        self.state.lock().bytes
    }

    /// Most recent finalized head reported through this buffer
    pub fn finalized_head(&self) -> Option<BlockRef> {
        self.state.lock().finalized_head.clone()
    }
}
