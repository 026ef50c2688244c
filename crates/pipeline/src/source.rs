//! Pipeline orchestrator
//!
//! One logical stream of control per instance: pull from the transport,
//! transform, push to the target. The HTTP request and the buffer's own
//! timers are the only concurrently-active background work.
//!
//! ```text
//! [QueryBuilder] --ranges--> [PortalSource] --batches--> [Transformer] --> [Target]
//!                                  ^                                          |
//!                                  +------- fork point resolution ------------+
//! ```
//!
//! # Fork recovery
//!
//! A fork signal from the transport suspends reading. The target resolves
//! the reported `previous_blocks` against its stored rollback chain and
//! returns the cursor to resume from; every transformer is told to discard
//! state above that cursor, then range calculation restarts from
//! `cursor.number + 1` with `parent_block_hash = cursor.hash`. Any fork the
//! target cannot resolve is fatal.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use portal_metrics::{
    MetricsRegistry, Profiler, ProgressTracker, Reporter, DEFAULT_REPORT_INTERVAL,
};
use portal_protocol::{Block, BlockBatch, BlockCursor, StreamRequest};
use portal_transform::{
    BatchCtx, BatchMeta, HeadState, QueryPlan, QueryRef, RangeState, StartCtx, Transformer,
};
use portal_transport::{BlockStream, PortalClient, TransportError};

use crate::cache::StreamCache;
use crate::error::PipelineError;
use crate::query::{QueryBuilder, RangeBound, RangeRequest};
use crate::target::Target;
use crate::Result;

#[cfg(test)]
#[path = "source_test.rs"]
mod tests;

/// One transformed batch and the context it was produced under
pub struct PipelineBatch<Out> {
    pub data: Out,
    pub ctx: Arc<BatchCtx>,
}

/// Mutable run state threaded through the reading loop
struct RunState {
    resume: Option<BlockCursor>,
    rollback: Vec<BlockCursor>,
    finalized: Option<BlockCursor>,
    latest: Option<BlockCursor>,
    initial: u64,
    range_end: Option<u64>,
    bytes_total: u64,
}

impl RunState {
    /// Drop chain entries at or below the finalized head
    fn prune_rollback(&mut self) {
        if let Some(finalized) = self.finalized.as_ref().map(|c| c.number) {
            self.rollback.retain(|c| c.number > finalized);
        }
    }
}

/// Streams one portal dataset into a target.
///
/// Multiple instances may run concurrently but never share mutable state;
/// the target and cache are the only sharing points and synchronize
/// themselves.
pub struct PortalSource<B: Block, Out: Send + 'static> {
    client: PortalClient,
    query: Arc<dyn QueryBuilder>,
    transformer: Transformer<BlockBatch<B>, Out>,
    cache: Option<Arc<dyn StreamCache<B>>>,
    metrics: MetricsRegistry,
    profiler: Profiler,
    progress: ProgressTracker,
    report_interval: Duration,
    cancel: CancellationToken,
}

impl<B: Block, Out: Send + 'static> PortalSource<B, Out> {
    pub fn new(
        client: PortalClient,
        query: impl QueryBuilder + 'static,
        transformer: Transformer<BlockBatch<B>, Out>,
    ) -> Self {
        Self {
            client,
            query: Arc::new(query),
            transformer,
            cache: None,
            metrics: MetricsRegistry::disabled(),
            profiler: Profiler::noop(),
            progress: ProgressTracker::new(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    /// Serve ranges from this cache before going to the network
    pub fn with_cache(mut self, cache: impl StreamCache<B> + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Token unblocking every suspension point when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a prompt stop; `run` returns `Cancelled`
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Drive the pipeline to completion.
    ///
    /// Returns when the requested range is exhausted, the run is cancelled
    /// or a fatal error occurs. Transformer `stop` and the reporter
    /// shutdown run on every exit path.
    pub async fn run<T: Target<Out>>(self, target: &T) -> Result<()> {
        let record = target.cursor().await?;

        let mut plan = QueryPlan::new();
        let builder_fields = self.query.fields();
        if !builder_fields.is_null() {
            plan.require(builder_fields);
        }
        self.transformer.query(&mut plan).await?;

        let bound = RangeBound {
            resume: record.as_ref().map(|r| r.current.clone()),
        };
        let ranges = self.query.calculate_ranges(&bound);
        let Some(first) = ranges.first() else {
            info!(
                dataset = self.query.dataset_kind(),
                "range already covered; nothing to request"
            );
            return Ok(());
        };

        let mut state = RunState {
            resume: bound.resume,
            rollback: record
                .as_ref()
                .map(|r| r.rollback_chain.clone())
                .unwrap_or_default(),
            finalized: record.as_ref().and_then(|r| r.finalized.clone()),
            latest: None,
            initial: first.range.0,
            range_end: None,
            bytes_total: 0,
        };
        self.progress
            .set_range(state.initial, ranges.last().and_then(|r| r.range.1));

        info!(
            dataset = self.query.dataset_kind(),
            initial = state.initial,
            resume = state.resume.as_ref().map(|c| c.number),
            "starting pipeline"
        );
        self.transformer
            .start(&StartCtx {
                initial: state.initial,
                current: state.resume.clone(),
            })
            .await?;
        let mut reporter = Reporter::with_interval(
            self.metrics.clone(),
            self.progress.clone(),
            self.report_interval,
        );
        reporter.start();

        let result = self.read(target, &mut state, &plan).await;

        // Scoped cleanup: stop hooks and the reporter run error or not
        let stopped = self.transformer.stop().await;
        reporter.stop().await;
        result.and(stopped.map_err(PipelineError::from))
    }

    /// Reading state, re-entered after each resolved fork
    async fn read<T: Target<Out>>(
        &self,
        target: &T,
        state: &mut RunState,
        plan: &QueryPlan,
    ) -> Result<()> {
        loop {
            let ranges = self.query.calculate_ranges(&RangeBound {
                resume: state.resume.clone(),
            });
            if ranges.is_empty() {
                info!(
                    dataset = self.query.dataset_kind(),
                    last_block = state.resume.as_ref().map(|c| c.number),
                    "range exhausted"
                );
                return Ok(());
            }

            let before = state.resume.as_ref().map(|c| c.number);
            match self.drain_ranges(target, state, &ranges, plan).await {
                // A pass that advanced the cursor may re-request the
                // remainder; one that did not means the source is drained
                Ok(()) if state.resume.as_ref().map(|c| c.number) != before => {}
                Ok(()) => return Ok(()),
                Err(PipelineError::Transport(TransportError::Fork {
                    previous_blocks,
                    from_block,
                    ..
                })) => {
                    warn!(
                        from_block,
                        reported_blocks = previous_blocks.len(),
                        "fork detected; resolving against target"
                    );
                    let cursor = self.resolve_fork(target, &previous_blocks).await?;
                    info!(
                        fork_block = cursor.number,
                        fork_hash = cursor.hash.as_deref().unwrap_or(""),
                        "fork point resolved; rolling back"
                    );
                    self.transformer.fork(&cursor).await?;
                    state.rollback.retain(|c| c.number <= cursor.number);
                    state.resume = Some(cursor);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn drain_ranges<T: Target<Out>>(
        &self,
        target: &T,
        state: &mut RunState,
        ranges: &[RangeRequest],
        plan: &QueryPlan,
    ) -> Result<()> {
        for range_request in ranges {
            let (from, to) = range_request.range;
            state.range_end = to;

            let mut request =
                StreamRequest::from(from).with_query(merge_plan(range_request.request.clone(), plan));
            if let Some(to) = to {
                request = request.to(to);
            }
            if let Some(cursor) = &state.resume {
                if cursor.number + 1 == from {
                    if let Some(hash) = &cursor.hash {
                        request = request.parent(hash.clone());
                    }
                }
            }
            let query_ref = QueryRef::new(self.client.base_url(), request.to_body());

            let mut stream = self.open_stream(&request).await;
            let mut deliveries: u64 = 0;

            loop {
                // Biased so a shutdown observed alongside a ready stream
                // item always wins
                let item = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        stream.cancel();
                        return Err(PipelineError::Cancelled);
                    }
                    item = stream.next() => item,
                };
                let Some(next) = item else {
                    debug!(from, to, "sub-range complete");
                    break;
                };
                let batch = next?;
                deliveries += 1;

                if let Some(head) = &batch.finalized_head {
                    state.finalized = Some(BlockCursor::from(head));
                }
                if batch.is_empty() {
                    debug!(
                        finalized = state.finalized.as_ref().map(|c| c.number),
                        "caught up to head"
                    );
                    continue;
                }
                self.deliver(target, state, batch, &query_ref, deliveries)
                    .await?;
            }
        }
        Ok(())
    }

    async fn open_stream(&self, request: &StreamRequest) -> BlockStream<B> {
        if let Some(cache) = &self.cache {
            if let Some(stream) = cache.get_stream(request).await {
                debug!(from_block = request.from_block, "serving range from cache");
                return stream;
            }
        }
        self.client.stream(request.clone())
    }

    async fn deliver<T: Target<Out>>(
        &self,
        target: &T,
        state: &mut RunState,
        batch: BlockBatch<B>,
        query: &QueryRef,
        deliveries: u64,
    ) -> Result<()> {
        let Some(current) = batch.last_cursor() else {
            return Ok(());
        };
        let span = self.profiler.span("batch");

        let finalized = state.finalized.as_ref().map(|c| c.number);
        for block in &batch.blocks {
            let cursor = block.cursor();
            if finalized.map_or(true, |f| cursor.number > f) {
                state.rollback.push(cursor);
            }
        }
        state.prune_rollback();
        state.latest = Some(current.clone());
        state.bytes_total += batch.bytes;

        let blocks = batch.len() as u64;
        let bytes = batch.bytes;
        let ctx = Arc::new(BatchCtx {
            head: HeadState {
                finalized: state.finalized.clone(),
                latest: state.latest.clone(),
            },
            state: RangeState {
                initial: state.initial,
                last: state.range_end,
                current: current.clone(),
                rollback_chain: state.rollback.clone(),
            },
            meta: BatchMeta {
                bytes,
                deliveries_in_range: deliveries,
                received_at: batch.last_block_received_at,
            },
            query: query.clone(),
            profiler: self.profiler.clone(),
            metrics: self.metrics.clone(),
        });

        let data = self.transformer.transform(batch, Arc::clone(&ctx)).await?;
        target.write(PipelineBatch { data, ctx }).await?;

        state.resume = Some(current.clone());
        self.metrics.gauge("pipeline_current_block").set(current.number);
        self.metrics.counter("pipeline_batches_total").inc();
        self.metrics.counter("pipeline_blocks_total").add(blocks);
        self.metrics.histogram("pipeline_batch_bytes").observe(bytes);
        self.progress.record(current.number, state.bytes_total);

        span.end();
        Ok(())
    }

    async fn resolve_fork<T: Target<Out>>(
        &self,
        target: &T,
        previous_blocks: &[BlockCursor],
    ) -> Result<BlockCursor> {
        if previous_blocks.is_empty() {
            return Err(PipelineError::ForkWithoutHistory);
        }
        if !target.supports_fork() {
            return Err(PipelineError::ForkUnsupported);
        }
        match target.fork(previous_blocks).await? {
            Some(cursor) => Ok(cursor),
            None => Err(PipelineError::ForkBeyondFinalized),
        }
    }
}

/// Merge the aggregated field plan into a request body's `fields` entry
fn merge_plan(body: serde_json::Value, plan: &QueryPlan) -> serde_json::Value {
    if plan.is_empty() {
        return body;
    }
    let mut fields = QueryPlan::new();
    let mut body = match body {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    if let Some(existing) = body.remove("fields") {
        fields.require(existing);
    }
    fields.require(plan.fields().clone());
    body.insert("fields".to_owned(), fields.into_fields());
    serde_json::Value::Object(body)
}
