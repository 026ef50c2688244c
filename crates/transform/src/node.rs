//! The normalized transformer node
//!
//! All accepted shapes (plain function, hooks bundle, full trait impl)
//! collapse into [`Transformer`] at construction; composition and the
//! engine only ever deal with that one type.

use std::sync::Arc;

use async_trait::async_trait;
use portal_protocol::BlockCursor;

use crate::ctx::{BatchCtx, StartCtx};
use crate::plan::QueryPlan;
use crate::{BoxFuture, Result};

#[cfg(test)]
#[path = "node_test.rs"]
mod tests;

/// The full transformer surface: five lifecycle hooks.
///
/// Only `transform` is required. `transform` is invoked once per batch,
/// sequentially; the engine never calls it concurrently on one instance.
/// `fork` must discard any in-memory state associated with blocks at or
/// above the given cursor, mirroring what the target does to persisted
/// state.
#[async_trait]
pub trait Transform<In, Out>: Send + Sync
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Declare needed fields against the shared query plan
    async fn query(&self, plan: &mut QueryPlan) -> Result<()> {
        let _ = plan;
        Ok(())
    }

    /// Initialize resources given the resume cursor
    async fn start(&self, ctx: &StartCtx) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Map one batch
    async fn transform(&self, data: In, ctx: Arc<BatchCtx>) -> Result<Out>;

    /// A rollback point was established; drop state at or above it
    async fn fork(&self, cursor: &BlockCursor) -> Result<()> {
        let _ = cursor;
        Ok(())
    }

    /// Release resources; runs on every exit path
    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

type QueryHook = Box<dyn Fn(&mut QueryPlan) -> Result<()> + Send + Sync>;
type StartHook = Box<dyn Fn(StartCtx) -> BoxFuture<Result<()>> + Send + Sync>;
type ForkHook = Box<dyn Fn(BlockCursor) -> BoxFuture<Result<()>> + Send + Sync>;
type StopHook = Box<dyn Fn() -> BoxFuture<Result<()>> + Send + Sync>;
type TransformFn<In, Out> = Box<dyn Fn(In, Arc<BatchCtx>) -> BoxFuture<Result<Out>> + Send + Sync>;

/// The "options object" shape: a transform closure plus optional hooks.
///
/// ```ignore
/// let node = Transformer::from_hooks(
///     Hooks::new("decode-logs", |data, _ctx| async move { Ok(decode(data)) })
///         .on_query(|plan| {
///             plan.require(json!({"log": {"topics": true}}));
///             Ok(())
///         }),
/// );
/// ```
pub struct Hooks<In, Out> {
    id: String,
    query: Option<QueryHook>,
    start: Option<StartHook>,
    transform: TransformFn<In, Out>,
    fork: Option<ForkHook>,
    stop: Option<StopHook>,
}

impl<In: Send + 'static, Out: Send + 'static> Hooks<In, Out> {
    /// Create a hooks bundle around the required transform closure
    pub fn new<F, Fut>(id: impl Into<String>, transform: F) -> Self
    where
        F: Fn(In, Arc<BatchCtx>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out>> + Send + 'static,
    {
        Self {
            id: id.into(),
            query: None,
            start: None,
            transform: Box::new(move |data, ctx| Box::pin(transform(data, ctx))),
            fork: None,
            stop: None,
        }
    }

    /// Attach a query hook
    pub fn on_query<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut QueryPlan) -> Result<()> + Send + Sync + 'static,
    {
        self.query = Some(Box::new(hook));
        self
    }

    /// Attach a start hook
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(StartCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.start = Some(Box::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Attach a fork hook
    pub fn on_fork<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(BlockCursor) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.fork = Some(Box::new(move |cursor| Box::pin(hook(cursor))));
        self
    }

    /// Attach a stop hook
    pub fn on_stop<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.stop = Some(Box::new(move || Box::pin(hook())));
        self
    }
}

#[async_trait]
impl<In: Send + 'static, Out: Send + 'static> Transform<In, Out> for Hooks<In, Out> {
    async fn query(&self, plan: &mut QueryPlan) -> Result<()> {
        match &self.query {
            Some(hook) => hook(plan),
            None => Ok(()),
        }
    }

    async fn start(&self, ctx: &StartCtx) -> Result<()> {
        match &self.start {
            Some(hook) => hook(ctx.clone()).await,
            None => Ok(()),
        }
    }

    async fn transform(&self, data: In, ctx: Arc<BatchCtx>) -> Result<Out> {
        (self.transform)(data, ctx).await
    }

    async fn fork(&self, cursor: &BlockCursor) -> Result<()> {
        match &self.fork {
            Some(hook) => hook(cursor.clone()).await,
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<()> {
        match &self.stop {
            Some(hook) => hook().await,
            None => Ok(()),
        }
    }
}

/// A node in the transformer tree.
///
/// Every lifecycle call delegates to the node's own hook and, for composed
/// nodes, forwards to children in declaration order after the node's own
/// hook completes.
pub struct Transformer<In, Out> {
    id: String,
    inner: Box<dyn Transform<In, Out>>,
}

impl<In: Send + 'static, Out: Send + 'static> Transformer<In, Out> {
    /// Normalize a full [`Transform`] implementation
    pub fn new(id: impl Into<String>, inner: impl Transform<In, Out> + 'static) -> Self {
        Self {
            id: id.into(),
            inner: Box::new(inner),
        }
    }

    /// Normalize a plain async function
    pub fn from_fn<F, Fut>(id: impl Into<String>, transform: F) -> Self
    where
        F: Fn(In, Arc<BatchCtx>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out>> + Send + 'static,
    {
        let id = id.into();
        Self::from_hooks(Hooks::new(id, transform))
    }

    /// Normalize a hooks bundle
    pub fn from_hooks(hooks: Hooks<In, Out>) -> Self {
        let id = hooks.id.clone();
        Self::new(id, hooks)
    }

    /// Transformer id used for logging and profiling
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Re-label this transformer (sibling collision disambiguation)
    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    /// Invoke `query`, then children
    pub async fn query(&self, plan: &mut QueryPlan) -> Result<()> {
        self.inner.query(plan).await
    }

    /// Invoke `start`, then children
    pub async fn start(&self, ctx: &StartCtx) -> Result<()> {
        tracing::debug!(transformer = %self.id, initial = ctx.initial, "starting transformer");
        self.inner.start(ctx).await
    }

    /// Invoke `transform` under a profiling span
    pub async fn transform(&self, data: In, ctx: Arc<BatchCtx>) -> Result<Out> {
        let span = ctx.profiler.span(&format!("transform/{}", self.id));
        let out = self.inner.transform(data, Arc::clone(&ctx)).await;
        span.end();
        out
    }

    /// Invoke `fork`, then children
    pub async fn fork(&self, cursor: &BlockCursor) -> Result<()> {
        tracing::debug!(transformer = %self.id, cursor = %cursor, "forking transformer");
        self.inner.fork(cursor).await
    }

    /// Invoke `stop`, then children
    pub async fn stop(&self) -> Result<()> {
        tracing::debug!(transformer = %self.id, "stopping transformer");
        self.inner.stop().await
    }

    /// Append `next` as this node's child: linear chaining.
    ///
    /// The composite keeps this node's id; lifecycle hooks run on this node
    /// first, then on `next`.
    pub fn pipe<Next: Send + 'static>(
        self,
        next: Transformer<Out, Next>,
    ) -> Transformer<In, Next> {
        let id = self.id.clone();
        Transformer {
            id,
            inner: Box::new(Piped {
                first: self,
                second: next,
            }),
        }
    }
}

impl<In: Send + 'static> Transformer<In, In> {
    /// Pass-through node, useful as a composition leaf and in tests
    pub fn identity(id: impl Into<String>) -> Self {
        Self::from_fn(id, |data, _ctx| async move { Ok(data) })
    }
}

/// Linear composition of two nodes
struct Piped<In, Mid, Out> {
    first: Transformer<In, Mid>,
    second: Transformer<Mid, Out>,
}

#[async_trait]
impl<In, Mid, Out> Transform<In, Out> for Piped<In, Mid, Out>
where
    In: Send + 'static,
    Mid: Send + 'static,
    Out: Send + 'static,
{
    async fn query(&self, plan: &mut QueryPlan) -> Result<()> {
        self.first.query(plan).await?;
        self.second.query(plan).await
    }

    async fn start(&self, ctx: &StartCtx) -> Result<()> {
        self.first.start(ctx).await?;
        self.second.start(ctx).await
    }

    async fn transform(&self, data: In, ctx: Arc<BatchCtx>) -> Result<Out> {
        let mid = self.first.transform(data, Arc::clone(&ctx)).await?;
        self.second.transform(mid, ctx).await
    }

    async fn fork(&self, cursor: &BlockCursor) -> Result<()> {
        self.first.fork(cursor).await?;
        self.second.fork(cursor).await
    }

    async fn stop(&self) -> Result<()> {
        // Both nodes must get their stop even if the first fails
        let first = self.first.stop().await;
        let second = self.second.stop().await;
        first.and(second)
    }
}
