use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use super::*;
use crate::memory::InMemoryTarget;
use crate::target::CursorRecord;
use portal_protocol::BlockRef;
use portal_transform::{Hooks, TransformError};

#[derive(Debug, Clone, Deserialize)]
struct TestBlock {
    number: u64,
    hash: String,
}

impl Block for TestBlock {
    fn number(&self) -> u64 {
        self.number
    }

    fn hash(&self) -> &str {
        &self.hash
    }
}

fn batch(
    blocks: std::ops::RangeInclusive<u64>,
    finalized: Option<(u64, &str)>,
) -> BlockBatch<TestBlock> {
    let blocks: Vec<TestBlock> = blocks
        .map(|n| TestBlock {
            number: n,
            hash: format!("0x{n}"),
        })
        .collect();
    BlockBatch {
        bytes: blocks.len() as u64 * 10,
        blocks,
        finalized_head: finalized.map(|(n, h)| BlockRef::new(n, h)),
        last_block_received_at: std::time::Instant::now(),
    }
}

fn fork_signal(from_block: u64, previous: Vec<BlockCursor>) -> TransportError {
    TransportError::Fork {
        previous_blocks: previous,
        from_block,
        parent_block_hash: None,
    }
}

/// Cache serving scripted streams keyed by `fromBlock`, recording every
/// request. Unknown ranges get an empty stream.
#[derive(Clone, Default)]
struct ScriptedCache {
    scripts: Arc<Mutex<HashMap<u64, Vec<std::result::Result<BlockBatch<TestBlock>, TransportError>>>>>,
    requests: Arc<Mutex<Vec<StreamRequest>>>,
}

impl ScriptedCache {
    fn script(
        &self,
        from_block: u64,
        items: Vec<std::result::Result<BlockBatch<TestBlock>, TransportError>>,
    ) {
        self.scripts.lock().insert(from_block, items);
    }

    fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl StreamCache<TestBlock> for ScriptedCache {
    async fn get_stream(&self, request: &StreamRequest) -> Option<BlockStream<TestBlock>> {
        self.requests.lock().push(request.clone());
        let items = self
            .scripts
            .lock()
            .remove(&request.from_block)
            .unwrap_or_default();
        Some(BlockStream::from_results(items))
    }
}

/// Splits a fixed range into equal chunks
struct ChunkedQuery {
    from: u64,
    to: u64,
    chunk: u64,
}

impl QueryBuilder for ChunkedQuery {
    fn calculate_ranges(&self, bound: &RangeBound) -> Vec<RangeRequest> {
        let mut from = match &bound.resume {
            Some(cursor) => (cursor.number + 1).max(self.from),
            None => self.from,
        };
        let mut out = Vec::new();
        while from <= self.to {
            let to = (from + self.chunk - 1).min(self.to);
            out.push(RangeRequest {
                range: (from, Some(to)),
                request: Value::Null,
            });
            from = to + 1;
        }
        out
    }

    fn dataset_kind(&self) -> &str {
        "test"
    }

    fn fields(&self) -> Value {
        Value::Null
    }
}

/// Target capturing every write and its context; no fork support
#[derive(Clone, Default)]
struct RecordingTarget {
    written: Arc<Mutex<Vec<(Vec<u64>, Arc<BatchCtx>)>>>,
}

#[async_trait::async_trait]
impl Target<Vec<u64>> for RecordingTarget {
    async fn cursor(&self) -> Result<Option<CursorRecord>> {
        Ok(None)
    }

    async fn write(&self, batch: PipelineBatch<Vec<u64>>) -> Result<()> {
        self.written.lock().push((batch.data, batch.ctx));
        Ok(())
    }
}

fn numbers() -> Transformer<BlockBatch<TestBlock>, Vec<u64>> {
    Transformer::from_fn("numbers", |batch: BlockBatch<TestBlock>, _ctx| async move {
        Ok(batch.blocks.iter().map(|b| b.number).collect())
    })
}

/// `numbers` plus lifecycle events recorded into `events`
fn recording_numbers(
    events: &Arc<Mutex<Vec<String>>>,
) -> Transformer<BlockBatch<TestBlock>, Vec<u64>> {
    let start_events = Arc::clone(events);
    let fork_events = Arc::clone(events);
    let stop_events = Arc::clone(events);
    Transformer::from_hooks(
        Hooks::new("numbers", |batch: BlockBatch<TestBlock>, _ctx| async move {
            Ok(batch.blocks.iter().map(|b| b.number).collect::<Vec<u64>>())
        })
        .on_start(move |ctx| {
            let events = Arc::clone(&start_events);
            async move {
                events.lock().push(format!("start:{}", ctx.initial));
                Ok(())
            }
        })
        .on_fork(move |cursor| {
            let events = Arc::clone(&fork_events);
            async move {
                events.lock().push(format!("fork:{}", cursor.number));
                Ok(())
            }
        })
        .on_stop(move || {
            let events = Arc::clone(&stop_events);
            async move {
                events.lock().push("stop".to_owned());
                Ok(())
            }
        }),
    )
}

fn source_with(
    query: impl QueryBuilder + 'static,
    transformer: Transformer<BlockBatch<TestBlock>, Vec<u64>>,
    cache: &ScriptedCache,
) -> PortalSource<TestBlock, Vec<u64>> {
    init_tracing();
    PortalSource::new(PortalClient::new("http://portal.invalid"), query, transformer)
        .with_cache(cache.clone())
}

/// Surface orchestrator logs under `RUST_LOG` with `--nocapture`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn chunked_ranges_stream_in_order() {
    let cache = ScriptedCache::default();
    cache.script(1, vec![Ok(batch(1..=3, Some((2, "0x2"))))]);
    cache.script(4, vec![Ok(batch(4..=6, Some((4, "0x4"))))]);

    let metrics = MetricsRegistry::new();
    let target = RecordingTarget::default();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 6,
            chunk: 3,
        },
        numbers(),
        &cache,
    )
    .with_metrics(metrics.clone());

    source.run(&target).await.unwrap();

    let written = target.written.lock();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].0, vec![1, 2, 3]);
    assert_eq!(written[1].0, vec![4, 5, 6]);

    // Rollback chains carry only blocks above the finalized head
    let first_ctx = &written[0].1;
    assert_eq!(first_ctx.head.finalized, Some(BlockCursor::with_hash(2, "0x2")));
    assert_eq!(
        first_ctx.state.rollback_chain,
        vec![BlockCursor::with_hash(3, "0x3")]
    );
    let second_ctx = &written[1].1;
    assert_eq!(
        second_ctx.state.rollback_chain,
        vec![
            BlockCursor::with_hash(5, "0x5"),
            BlockCursor::with_hash(6, "0x6"),
        ]
    );
    for (_, ctx) in written.iter() {
        let finalized = ctx.head.finalized.as_ref().map(|c| c.number).unwrap_or(0);
        assert!(ctx.state.rollback_chain.iter().all(|c| c.number > finalized));
        // The delivery counter restarts with every sub-range
        assert_eq!(ctx.meta.deliveries_in_range, 1);
    }

    // Second sub-range resumes with the parent hash of the first
    let requests = cache.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].from_block, 1);
    assert_eq!(requests[0].to_block, Some(3));
    assert_eq!(requests[0].parent_block_hash, None);
    assert_eq!(requests[1].from_block, 4);
    assert_eq!(requests[1].parent_block_hash, Some("0x3".to_owned()));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.gauges.get("pipeline_current_block"), Some(&6));
    assert_eq!(snapshot.counters.get("pipeline_blocks_total"), Some(&6));
}

#[tokio::test]
async fn fork_resumes_from_the_resolved_cursor() {
    let cache = ScriptedCache::default();
    // Portal's block 5 is no longer ours: requesting 6 gets the fork signal
    cache.script(
        6,
        vec![Err(fork_signal(
            6,
            vec![
                BlockCursor::with_hash(4, "0x4"),
                BlockCursor::with_hash(5, "0x5b"),
            ],
        ))],
    );
    cache.script(5, vec![Ok(batch(5..=10, Some((4, "0x4"))))]);

    let target: InMemoryTarget<Vec<u64>> = InMemoryTarget::with_record(CursorRecord {
        current: BlockCursor::with_hash(5, "0x5"),
        finalized: Some(BlockCursor::with_hash(3, "0x3")),
        rollback_chain: vec![
            BlockCursor::with_hash(4, "0x4"),
            BlockCursor::with_hash(5, "0x5"),
        ],
    });
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let source = source_with(
        ChunkedQuery {
            from: 0,
            to: 10,
            chunk: 100,
        },
        recording_numbers(&events),
        &cache,
    );

    source.run(&target).await.unwrap();

    let requests = cache.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].from_block, 6);
    assert_eq!(requests[0].parent_block_hash, Some("0x5".to_owned()));
    assert_eq!(requests[1].from_block, 5);
    assert_eq!(requests[1].parent_block_hash, Some("0x4".to_owned()));

    assert!(events.lock().contains(&"fork:4".to_owned()));
    let record = target.record().unwrap();
    assert_eq!(record.current, BlockCursor::with_hash(10, "0x10"));
    assert_eq!(target.written(), vec![vec![5, 6, 7, 8, 9, 10]]);
}

#[tokio::test]
async fn fork_with_no_previous_blocks_is_fatal() {
    let cache = ScriptedCache::default();
    cache.script(1, vec![Err(fork_signal(1, Vec::new()))]);

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let target: InMemoryTarget<Vec<u64>> = InMemoryTarget::new();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 10,
            chunk: 100,
        },
        recording_numbers(&events),
        &cache,
    );

    let err = source.run(&target).await.unwrap_err();
    assert!(matches!(err, PipelineError::ForkWithoutHistory));
    // Cleanup still ran
    assert!(events.lock().contains(&"stop".to_owned()));
}

#[tokio::test]
async fn fork_without_target_support_is_fatal() {
    let cache = ScriptedCache::default();
    cache.script(
        1,
        vec![Err(fork_signal(1, vec![BlockCursor::with_hash(0, "0x0")]))],
    );

    let target = RecordingTarget::default();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 10,
            chunk: 100,
        },
        numbers(),
        &cache,
    );

    let err = source.run(&target).await.unwrap_err();
    assert!(matches!(err, PipelineError::ForkUnsupported));
}

#[tokio::test]
async fn fork_past_finalization_is_fatal() {
    let cache = ScriptedCache::default();
    cache.script(
        6,
        vec![Err(fork_signal(6, vec![BlockCursor::with_hash(2, "0x2")]))],
    );

    // Everything up to 5 is finalized; nothing left to roll back to
    let target: InMemoryTarget<Vec<u64>> = InMemoryTarget::with_record(CursorRecord {
        current: BlockCursor::with_hash(5, "0x5"),
        finalized: Some(BlockCursor::with_hash(5, "0x5")),
        rollback_chain: Vec::new(),
    });
    let source = source_with(
        ChunkedQuery {
            from: 0,
            to: 10,
            chunk: 100,
        },
        numbers(),
        &cache,
    );

    let err = source.run(&target).await.unwrap_err();
    assert!(matches!(err, PipelineError::ForkBeyondFinalized));
}

#[tokio::test]
async fn resume_is_idempotent_across_runs() {
    let target: InMemoryTarget<Vec<u64>> = InMemoryTarget::new();

    // First run covers part of the range, then the source dries up
    let cache = ScriptedCache::default();
    cache.script(1, vec![Ok(batch(1..=3, None))]);
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 6,
            chunk: 100,
        },
        numbers(),
        &cache,
    );
    source.run(&target).await.unwrap();
    assert_eq!(target.written(), vec![vec![1, 2, 3]]);

    // Second run picks up at the persisted cursor
    let cache = ScriptedCache::default();
    cache.script(4, vec![Ok(batch(4..=6, None))]);
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 6,
            chunk: 100,
        },
        numbers(),
        &cache,
    );
    source.run(&target).await.unwrap();
    assert_eq!(cache.requests()[0].from_block, 4);
    assert_eq!(target.written(), vec![vec![1, 2, 3], vec![4, 5, 6]]);

    // Third run has nothing left to request
    let cache = ScriptedCache::default();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 6,
            chunk: 100,
        },
        numbers(),
        &cache,
    );
    source.run(&target).await.unwrap();
    assert!(cache.requests().is_empty());
    assert_eq!(target.written(), vec![vec![1, 2, 3], vec![4, 5, 6]]);
}

#[tokio::test]
async fn shutdown_unblocks_the_run_and_cleanup_still_happens() {
    let cache = ScriptedCache::default();
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let target: InMemoryTarget<Vec<u64>> = InMemoryTarget::new();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 10,
            chunk: 100,
        },
        recording_numbers(&events),
        &cache,
    );

    source.shutdown();
    let err = source.run(&target).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));

    let events = events.lock();
    assert!(events.contains(&"start:1".to_owned()));
    assert!(events.contains(&"stop".to_owned()));
}

#[tokio::test]
async fn transform_failure_stops_cleanly() {
    let cache = ScriptedCache::default();
    cache.script(1, vec![Ok(batch(1..=3, None))]);

    let stopped: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let stop_events = Arc::clone(&stopped);
    let transformer = Transformer::from_hooks(
        Hooks::new("boom", |_batch: BlockBatch<TestBlock>, _ctx| async move {
            Err::<Vec<u64>, _>(TransformError::failed("boom", "decode exploded"))
        })
        .on_stop(move || {
            let events = Arc::clone(&stop_events);
            async move {
                events.lock().push("stop".to_owned());
                Ok(())
            }
        }),
    );

    let target: InMemoryTarget<Vec<u64>> = InMemoryTarget::new();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 6,
            chunk: 100,
        },
        transformer,
        &cache,
    );

    let err = source.run(&target).await.unwrap_err();
    assert!(matches!(err, PipelineError::Transform(_)));
    assert!(target.written().is_empty());
    assert!(stopped.lock().contains(&"stop".to_owned()));
}

#[tokio::test]
async fn head_reports_reach_the_batch_context() {
    let cache = ScriptedCache::default();
    // A head-only report coalesces with the data that follows it
    let head_only = batch(1..=0, Some((9, "0x9")));
    cache.script(1, vec![Ok(head_only), Ok(batch(1..=2, None))]);

    let target = RecordingTarget::default();
    let source = source_with(
        ChunkedQuery {
            from: 1,
            to: 2,
            chunk: 100,
        },
        numbers(),
        &cache,
    );

    source.run(&target).await.unwrap();

    let written = target.written.lock();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].0, vec![1, 2]);
    let ctx = &written[0].1;
    assert_eq!(ctx.head.finalized, Some(BlockCursor::with_hash(9, "0x9")));
    // Blocks at or below the finalized head never enter the chain
    assert!(ctx.state.rollback_chain.is_empty());
}
