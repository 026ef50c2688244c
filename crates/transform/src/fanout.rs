//! Fan-out composition
//!
//! One input feeds every lane; outputs come back as a map keyed by lane
//! name. Lane keys and child transformer ids are disambiguated with an
//! incrementing numeric suffix so profiling and logging stay unambiguous.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use portal_protocol::BlockCursor;

use crate::ctx::{BatchCtx, StartCtx};
use crate::node::{Transform, Transformer};
use crate::plan::QueryPlan;
use crate::Result;

#[cfg(test)]
#[path = "fanout_test.rs"]
mod tests;

/// Named parallel lanes over the same input
pub struct FanOut<In, Out> {
    lanes: Vec<(String, Transformer<In, Out>)>,
}

impl<In, Out> FanOut<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
{
    pub fn new<K: Into<String>>(lanes: Vec<(K, Transformer<In, Out>)>) -> Self {
        let mut lanes: Vec<(String, Transformer<In, Out>)> =
            lanes.into_iter().map(|(k, t)| (k.into(), t)).collect();
        disambiguate(&mut lanes);
        Self { lanes }
    }

    pub fn lane_keys(&self) -> impl Iterator<Item = &str> {
        self.lanes.iter().map(|(k, _)| k.as_str())
    }
}

/// Append `-N` to repeated keys and repeated child ids, in declaration order
fn disambiguate<In, Out>(lanes: &mut [(String, Transformer<In, Out>)])
where
    In: Send + 'static,
    Out: Send + 'static,
{
    let mut keys: BTreeMap<String, usize> = BTreeMap::new();
    let mut ids: BTreeMap<String, usize> = BTreeMap::new();
    for (key, node) in lanes.iter_mut() {
        let seen = keys.entry(key.clone()).or_insert(0);
        if *seen > 0 {
            *key = format!("{key}-{seen}");
        }
        *seen += 1;

        let seen = ids.entry(node.id().to_owned()).or_insert(0);
        if *seen > 0 {
            node.set_id(format!("{}-{}", node.id(), seen));
        }
        *seen += 1;
    }
}

#[async_trait]
impl<In, Out> Transform<In, BTreeMap<String, Out>> for FanOut<In, Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
{
    async fn query(&self, plan: &mut QueryPlan) -> Result<()> {
        for (_, node) in &self.lanes {
            node.query(plan).await?;
        }
        Ok(())
    }

    async fn start(&self, ctx: &StartCtx) -> Result<()> {
        for (_, node) in &self.lanes {
            node.start(ctx).await?;
        }
        Ok(())
    }

    async fn transform(&self, data: In, ctx: Arc<BatchCtx>) -> Result<BTreeMap<String, Out>> {
        let mut out = BTreeMap::new();
        for (key, node) in &self.lanes {
            let value = node.transform(data.clone(), Arc::clone(&ctx)).await?;
            out.insert(key.clone(), value);
        }
        Ok(out)
    }

    async fn fork(&self, cursor: &BlockCursor) -> Result<()> {
        for (_, node) in &self.lanes {
            node.fork(cursor).await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Every lane gets its stop even when an earlier one fails
        let mut result = Ok(());
        for (_, node) in &self.lanes {
            let stopped = node.stop().await;
            if result.is_ok() {
                result = stopped;
            }
        }
        result
    }
}

impl<In, Out> Transformer<In, BTreeMap<String, Out>>
where
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
{
    /// Wrap named lanes into a single fan-out node
    pub fn fanned<K: Into<String>>(lanes: Vec<(K, Transformer<In, Out>)>) -> Self {
        Transformer::new("fan-out", FanOut::new(lanes))
    }
}

impl<In, Out> Transformer<In, Out>
where
    In: Send + 'static,
    Out: Clone + Send + Sync + 'static,
{
    /// Feed this node's output into every lane and collect a keyed map
    pub fn extend<K, Next>(
        self,
        lanes: Vec<(K, Transformer<Out, Next>)>,
    ) -> Transformer<In, BTreeMap<String, Next>>
    where
        K: Into<String>,
        Next: Send + 'static,
    {
        self.pipe(Transformer::fanned(lanes))
    }
}
