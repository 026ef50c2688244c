use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use super::*;
use crate::ctx::{BatchMeta, HeadState, QueryRef, RangeState, StartCtx};
use crate::node::Hooks;
use crate::QueryPlan;
use portal_metrics::{MetricsRegistry, Profiler};

fn ctx() -> Arc<BatchCtx> {
    Arc::new(BatchCtx {
        head: HeadState::default(),
        state: RangeState {
            initial: 0,
            last: None,
            current: BlockCursor::at(0),
            rollback_chain: Vec::new(),
        },
        meta: BatchMeta {
            bytes: 0,
            deliveries_in_range: 0,
            received_at: std::time::Instant::now(),
        },
        query: QueryRef::default(),
        profiler: Profiler::noop(),
        metrics: MetricsRegistry::disabled(),
    })
}

#[tokio::test]
async fn every_lane_sees_the_same_input() {
    let fanned = Transformer::fanned(vec![
        ("plus", Transformer::from_fn("plus", |n: u64, _ctx| async move { Ok(n + 1) })),
        ("times", Transformer::from_fn("times", |n: u64, _ctx| async move { Ok(n * 10) })),
    ]);

    let out = fanned.transform(4, ctx()).await.unwrap();

    assert_eq!(out.len(), 2);
    assert_eq!(out["plus"], 5);
    assert_eq!(out["times"], 40);
}

#[tokio::test]
async fn extend_composes_pipe_and_fan_out() {
    let chain = Transformer::from_fn("double", |n: u64, _ctx| async move { Ok(n * 2) }).extend(
        vec![
            ("as-is", Transformer::<u64, u64>::identity("as-is")),
            ("text", Transformer::from_fn("text", |n: u64, _ctx| async move {
                Ok(format!("{n}"))
            })
            .pipe(Transformer::from_fn("len", |s: String, _ctx| async move {
                Ok(s.len() as u64)
            }))),
        ],
    );

    let out = chain.transform(50, ctx()).await.unwrap();

    assert_eq!(out["as-is"], 100);
    assert_eq!(out["text"], 3);
}

#[test]
fn duplicate_lane_keys_get_numeric_suffixes() {
    let fanned = FanOut::new(vec![
        ("logs", Transformer::<u64, u64>::identity("a")),
        ("logs", Transformer::<u64, u64>::identity("b")),
        ("logs", Transformer::<u64, u64>::identity("c")),
    ]);

    let keys: Vec<&str> = fanned.lane_keys().collect();
    assert_eq!(keys, vec!["logs", "logs-1", "logs-2"]);
}

#[test]
fn duplicate_sibling_ids_get_numeric_suffixes() {
    let fanned = FanOut::new(vec![
        ("a", Transformer::<u64, u64>::identity("decode")),
        ("b", Transformer::<u64, u64>::identity("decode")),
    ]);

    let ids: Vec<&str> = fanned.lanes.iter().map(|(_, t)| t.id()).collect();
    assert_eq!(ids, vec!["decode", "decode-1"]);
}

#[tokio::test]
async fn lanes_contribute_to_one_query_plan() {
    let fanned = Transformer::fanned(vec![
        (
            "logs",
            Transformer::from_hooks(Hooks::new("logs", |n: u64, _ctx| async move { Ok(n) })
                .on_query(|plan| {
                    plan.require(json!({"log": {"topics": true}}));
                    Ok(())
                })),
        ),
        (
            "txs",
            Transformer::from_hooks(Hooks::new("txs", |n: u64, _ctx| async move { Ok(n) })
                .on_query(|plan| {
                    plan.require(json!({"transaction": {"hash": true}}));
                    Ok(())
                })),
        ),
    ]);

    let mut plan = QueryPlan::new();
    fanned.query(&mut plan).await.unwrap();

    assert_eq!(
        plan.fields(),
        &json!({
            "log": {"topics": true},
            "transaction": {"hash": true},
        })
    );
}

#[tokio::test]
async fn lifecycle_reaches_every_lane_in_order() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    fn recording(id: &str, log: &Arc<Mutex<Vec<String>>>) -> Transformer<u64, u64> {
        let on_start = Arc::clone(log);
        let on_stop = Arc::clone(log);
        let start_id = id.to_owned();
        let stop_id = id.to_owned();
        Transformer::from_hooks(
            Hooks::new(id, |n: u64, _ctx| async move { Ok(n) })
                .on_start(move |_ctx| {
                    let log = Arc::clone(&on_start);
                    let id = start_id.clone();
                    async move {
                        log.lock().push(format!("start:{id}"));
                        Ok(())
                    }
                })
                .on_stop(move || {
                    let log = Arc::clone(&on_stop);
                    let id = stop_id.clone();
                    async move {
                        log.lock().push(format!("stop:{id}"));
                        Ok(())
                    }
                }),
        )
    }

    let fanned = Transformer::fanned(vec![
        ("first", recording("first", &log)),
        ("second", recording("second", &log)),
    ]);

    fanned
        .start(&StartCtx {
            initial: 0,
            current: None,
        })
        .await
        .unwrap();
    fanned.stop().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["start:first", "start:second", "stop:first", "stop:second"]
    );
}
