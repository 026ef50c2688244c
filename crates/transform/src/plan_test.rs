//! Tests for query plan merging

use serde_json::json;

use super::*;

#[test]
fn empty_plan() {
    let plan = QueryPlan::new();
    assert!(plan.is_empty());
    assert_eq!(plan.fields(), &json!({}));
}

#[test]
fn objects_merge_recursively() {
    let mut plan = QueryPlan::new();
    plan.require(json!({"block": {"number": true}}));
    plan.require(json!({"block": {"hash": true}, "log": {"topics": true}}));

    assert_eq!(
        plan.fields(),
        &json!({
            "block": {"number": true, "hash": true},
            "log": {"topics": true}
        })
    );
}

#[test]
fn arrays_union_by_value() {
    let mut plan = QueryPlan::new();
    plan.require(json!({"topics": ["a", "b"]}));
    plan.require(json!({"topics": ["b", "c"]}));

    assert_eq!(plan.fields(), &json!({"topics": ["a", "b", "c"]}));
}

#[test]
fn later_scalar_wins() {
    let mut plan = QueryPlan::new();
    plan.require(json!({"limit": 10}));
    plan.require(json!({"limit": 20}));

    assert_eq!(plan.fields(), &json!({"limit": 20}));
}
