//! Portal HTTP client
//!
//! Translates a logical range request into one or more streaming HTTP
//! requests and feeds the responses through the line splitter into the
//! stream buffer. Exactly one request is in flight per stream.
//!
//! # Response handling
//!
//! | Status | Meaning | Action |
//! |--------|---------|--------|
//! | 200 | blocks follow as JSONL | parse lines, advance cursor, `put` |
//! | 204 | no data yet, head in headers | `flush` head-only delivery, poll |
//! | 409 | requested range is stale | fail buffer with the fork signal |
//! | 5xx/429 | transient | backoff and re-request from the advanced cursor |

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use portal_protocol::{Block, BlockBatch, BlockCursor, BlockRef, ProtocolError, StreamRequest};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::StreamBuffer;
use crate::config::{BufferConfig, PortalStreamConfig, RetryConfig};
use crate::error::TransportError;
use crate::lines::LineSplitter;
use crate::Result;

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

/// Response header carrying the finalized head number
pub const FINALIZED_HEAD_NUMBER: &str = "x-portal-finalized-head-number";
/// Response header carrying the finalized head hash
pub const FINALIZED_HEAD_HASH: &str = "x-portal-finalized-head-hash";

/// Client for one portal dataset endpoint.
///
/// Cheap to clone per stream; the inner `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    config: PortalStreamConfig,
}

impl PortalClient {
    /// Create a client with default configuration
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, PortalStreamConfig::default())
    }

    /// Create a client with explicit configuration
    pub fn with_config(base_url: impl Into<String>, config: PortalStreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            config,
        }
    }

    /// Replace the underlying HTTP client (timeouts, proxies)
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Stream configuration in effect
    pub fn config(&self) -> &PortalStreamConfig {
        &self.config
    }

    /// Dataset endpoint this client talks to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn stream_url(&self) -> String {
        format!("{}/stream", self.base_url.trim_end_matches('/'))
    }

    /// Open a pull stream over the requested range.
    ///
    /// Spawns the producer task; dropping the returned stream cancels it.
    pub fn stream<B: Block>(&self, request: StreamRequest) -> BlockStream<B> {
        let cancel = CancellationToken::new();
        let buffer = Arc::new(StreamBuffer::new(self.config.buffer.clone(), cancel.clone()));

        let worker = StreamWorker {
            http: self.http.clone(),
            url: self.stream_url(),
            retry: self.config.retry.clone(),
            head_poll_interval: self.config.head_poll_interval,
            buffer: Arc::clone(&buffer),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(request));

        BlockStream {
            buffer,
            cancel,
            task: Some(task),
        }
    }
}

/// Pull handle over a running portal stream.
///
/// `next` yields accumulated batches in strict block order until the range
/// is exhausted (`None`) or an error, including the fork signal, surfaces.
pub struct BlockStream<B> {
    buffer: Arc<StreamBuffer<B>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<B: Send> BlockStream<B> {
    /// Wait for the next batch
    pub async fn next(&mut self) -> Option<Result<BlockBatch<B>>> {
        match self.buffer.take().await {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }

    /// Most recent finalized head reported on this stream
    pub fn finalized_head(&self) -> Option<BlockRef> {
        self.buffer.finalized_head()
    }

    /// Token cancelling every suspension point of this stream
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the stream; pending data is still drained by `next`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Build a stream that replays already-fetched deliveries.
    ///
    /// Used by range caches and tests; the deliveries coalesce into a single
    /// batch, which is a legal delivery shape.
    pub fn preloaded(batches: Vec<BlockBatch<B>>) -> Self {
        Self::from_results(batches.into_iter().map(Ok).collect())
    }

    /// Build a stream that replays deliveries and, optionally, a terminal
    /// error.
    ///
    /// Items after the first `Err` are dropped; the buffer delivers the
    /// injected data first and surfaces the error on the following `next`.
    pub fn from_results(items: Vec<Result<BlockBatch<B>>>) -> Self {
        let cancel = CancellationToken::new();
        let buffer = StreamBuffer::new(
            BufferConfig::default().with_min_bytes(1),
            cancel.clone(),
        );
        let mut failed = false;
        for item in items {
            match item {
                Ok(batch) => buffer.inject(batch),
                Err(err) => {
                    buffer.fail(err);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            buffer.close();
        }
        Self {
            buffer: Arc::new(buffer),
            cancel,
            task: None,
        }
    }
}

impl<B> Drop for BlockStream<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            drop(task);
        }
    }
}

/// Producer side: owns the HTTP request loop for one stream
struct StreamWorker<B> {
    http: reqwest::Client,
    url: String,
    retry: RetryConfig,
    head_poll_interval: Option<Duration>,
    buffer: Arc<StreamBuffer<B>>,
    cancel: CancellationToken,
}

impl<B: Block> StreamWorker<B> {
    async fn run(self, request: StreamRequest) {
        match self.ingest(request).await {
            Ok(()) | Err(TransportError::Cancelled) => self.buffer.close(),
            Err(err) => self.buffer.fail(err),
        }
    }

    async fn ingest(&self, mut request: StreamRequest) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if request.is_exhausted() {
                debug!(from_block = request.from_block, "range exhausted");
                return Ok(());
            }

            let send = self.http.post(&self.url).json(&request.to_body()).send();
            let response = tokio::select! {
                r = send => r,
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable(&err) && attempt < self.retry.max_attempts {
                        self.backoff(&mut attempt, &err.to_string(), request.from_block)
                            .await?;
                        continue;
                    }
                    return Err(TransportError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
            };

            match response.status() {
                StatusCode::OK => {
                    attempt = 0;
                    if let Err(err) = self.drink(response, &mut request).await {
                        match err {
                            // A connection dropped mid-body is transient; the
                            // advanced cursor makes the retry exact
                            TransportError::Http(e) if attempt < self.retry.max_attempts => {
                                self.backoff(&mut attempt, &e.to_string(), request.from_block)
                                    .await?;
                            }
                            other => return Err(other),
                        }
                    }
                }
                StatusCode::NO_CONTENT => {
                    attempt = 0;
                    let head = finalized_head(response.headers())?;
                    debug!(
                        from_block = request.from_block,
                        head = head.as_ref().map(|h| h.number),
                        "caught up to head"
                    );
                    if head.is_some() {
                        self.buffer.put(head_only(head)).await?;
                    }
                    self.buffer.flush();
                    match self.head_poll_interval {
                        Some(interval) => self.sleep(interval).await?,
                        None => return Ok(()),
                    }
                }
                StatusCode::CONFLICT => {
                    let previous_blocks = fork_previous_blocks(response).await?;
                    return Err(TransportError::Fork {
                        previous_blocks,
                        from_block: request.from_block,
                        parent_block_hash: request.parent_block_hash.clone(),
                    });
                }
                status if status.is_server_error() || status.as_u16() == 429 => {
                    if attempt < self.retry.max_attempts {
                        self.backoff(
                            &mut attempt,
                            &format!("status {}", status),
                            request.from_block,
                        )
                        .await?;
                    } else {
                        return Err(TransportError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: format!("status {}", status),
                        });
                    }
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TransportError::unexpected_status(status.as_u16(), body));
                }
            }
        }
    }

    /// Stream one response body into the buffer, advancing the cursor
    async fn drink(
        &self,
        response: reqwest::Response,
        request: &mut StreamRequest,
    ) -> Result<()> {
        let head = finalized_head(response.headers())?;
        let mut splitter = LineSplitter::new();
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                c = body.next() => c,
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            };
            match chunk {
                Some(Ok(chunk)) => {
                    for line in splitter.push(&chunk) {
                        self.deliver(line, &head, request).await?;
                    }
                }
                Some(Err(err)) => return Err(TransportError::Http(err)),
                None => {
                    if let Some(line) = splitter.finish() {
                        self.deliver(line, &head, request).await?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Parse one line as a block, advance the request, hand to the buffer
    async fn deliver(
        &self,
        line: Bytes,
        head: &Option<BlockRef>,
        request: &mut StreamRequest,
    ) -> Result<()> {
        let block: B = serde_json::from_slice(&line).map_err(ProtocolError::InvalidBlock)?;
        if block.number() < request.from_block {
            return Err(ProtocolError::OutOfOrder {
                prev: request.from_block.saturating_sub(1),
                next: block.number(),
            }
            .into());
        }

        let bytes = line.len() as u64;
        request.advance(&block);

        self.buffer
            .put(BlockBatch {
                blocks: vec![block],
                finalized_head: head.clone(),
                bytes,
                last_block_received_at: std::time::Instant::now(),
            })
            .await
    }

    async fn backoff(&self, attempt: &mut u32, error: &str, from_block: u64) -> Result<()> {
        let delay = self.retry.delay(*attempt);
        *attempt += 1;
        warn!(
            error,
            attempt = *attempt,
            delay_ms = delay.as_millis() as u64,
            from_block,
            "portal request failed, retrying"
        );
        self.sleep(delay).await
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
        }
    }
}

fn head_only<B>(head: Option<BlockRef>) -> BlockBatch<B> {
    BlockBatch {
        blocks: Vec::new(),
        finalized_head: head,
        bytes: 0,
        last_block_received_at: std::time::Instant::now(),
    }
}

/// Parse the finalized head from response headers, if present
fn finalized_head(headers: &HeaderMap) -> Result<Option<BlockRef>> {
    let number = match headers.get(FINALIZED_HEAD_NUMBER) {
        None => return Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                ProtocolError::invalid_head(FINALIZED_HEAD_NUMBER, format!("{:?}", value))
            })?,
    };
    let hash = headers
        .get(FINALIZED_HEAD_HASH)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ProtocolError::invalid_head(FINALIZED_HEAD_HASH, "<missing>"))?;
    Ok(Some(BlockRef::new(number, hash)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkResponse {
    #[serde(default)]
    previous_blocks: Vec<BlockCursor>,
}

async fn fork_previous_blocks(response: reqwest::Response) -> Result<Vec<BlockCursor>> {
    let body: ForkResponse = response.json().await?;
    Ok(body.previous_blocks)
}

/// Transient classification for request-phase failures
fn is_retryable(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }
    if let Some(status) = error.status() {
        return status.is_server_error() || status.as_u16() == 429;
    }
    false
}
