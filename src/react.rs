use crate::{
    adapter::Adapter,
    common::*,
    config::{Count, MaxActive},
    error::Result,
    executor::Executor,
    future_stream::FutureStream,
    memoize::MemoizeCache,
    retry::RetryPolicy,
    task::{Dispatch, Task},
};

/// Builder of [FutureStream] pipelines.
///
/// It carries the executor that runs element work, the retry policy used
/// by [retry()](FutureStream::retry), the [MaxActive] admission thresholds
/// and the execution flags. Every `with_*` method returns a modified copy.
///
/// The construction methods never block and never submit work. The work of
/// each element is submitted when a terminal operation pulls it.
///
/// ```rust
/// use lazy_react::{Executor, LazyReact};
///
/// let react = LazyReact::new(Executor::new(4).unwrap());
/// let squares = react
///     .range(0, 5)
///     .map(|value| value * value)
///     .block()
///     .unwrap();
/// assert_eq!(squares, [0, 1, 4, 9, 16]);
/// ```
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct LazyReact {
    executor: Executor,
    retrier: RetryPolicy,
    is_async: bool,
    max_active: MaxActive,
    pooling_active: bool,
    auto_optimize: bool,
    auto_memoize: bool,
    #[derivative(Debug = "ignore")]
    memoize_cache: MemoizeCache,
}

impl LazyReact {
    /// Creates a builder running asynchronously on `executor` with the [IO](MaxActive::IO) thresholds.
    pub fn new(executor: Executor) -> Self {
        Self {
            executor,
            retrier: RetryPolicy::default(),
            is_async: true,
            max_active: MaxActive::IO,
            pooling_active: false,
            auto_optimize: true,
            auto_memoize: false,
            memoize_cache: MemoizeCache::default(),
        }
    }

    /// Creates a builder on a new runtime with `threads` workers.
    ///
    /// At most `max_active_tasks` elements are in flight. Draining stops once
    /// no more than `threads` remain.
    pub fn with_threads(threads: usize, max_active_tasks: usize) -> Result<Self> {
        let executor = Executor::new(threads)?;
        let max_active = MaxActive::new(max_active_tasks, threads.min(max_active_tasks));
        Ok(Self::new(executor).with_max_active(max_active))
    }

    /// Creates a builder on a new runtime with `parallelism` workers.
    pub fn parallel_builder<C>(parallelism: C) -> Result<Self>
    where
        C: Into<Count>,
    {
        Ok(Self::new(Executor::new(parallelism)?))
    }

    /// Creates a builder that runs element work on the thread pulling results.
    pub fn sequential_builder(executor: Executor) -> Self {
        Self::new(executor)
            .with_max_active(MaxActive::cpu())
            .sync_mode()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn retrier(&self) -> &RetryPolicy {
        &self.retrier
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn max_active(&self) -> MaxActive {
        self.max_active
    }

    pub fn is_pooling_active(&self) -> bool {
        self.pooling_active
    }

    pub fn is_auto_optimize(&self) -> bool {
        self.auto_optimize
    }

    pub fn is_auto_memoize(&self) -> bool {
        self.auto_memoize
    }

    pub fn memoize_cache(&self) -> &MemoizeCache {
        &self.memoize_cache
    }

    pub fn with_executor(self, executor: Executor) -> Self {
        Self { executor, ..self }
    }

    /// Sets the retry policy. `None` restores the default policy.
    pub fn with_retrier(self, retrier: Option<RetryPolicy>) -> Self {
        Self {
            retrier: retrier.unwrap_or_default(),
            ..self
        }
    }

    pub fn with_async(self, is_async: bool) -> Self {
        Self { is_async, ..self }
    }

    pub fn with_max_active<M>(self, max_active: M) -> Self
    where
        M: Into<MaxActive>,
    {
        Self {
            max_active: max_active.into(),
            ..self
        }
    }

    pub fn with_pooling_active(self, pooling_active: bool) -> Self {
        Self {
            pooling_active,
            ..self
        }
    }

    pub fn with_auto_optimize(self, auto_optimize: bool) -> Self {
        Self {
            auto_optimize,
            ..self
        }
    }

    /// Submits each element stage to the executor.
    pub fn async_mode(self) -> Self {
        self.with_async(true)
    }

    /// Runs element work on the thread pulling results.
    pub fn sync_mode(self) -> Self {
        self.with_async(false)
    }

    /// Runs async terminals on long-lived blocking workers instead of one task per element.
    pub fn object_pooling_on(self) -> Self {
        self.with_pooling_active(true)
    }

    pub fn object_pooling_off(self) -> Self {
        self.with_pooling_active(false)
    }

    /// Fuses consecutive element stages into a single executor hop.
    pub fn auto_optimize_on(self) -> Self {
        self.with_auto_optimize(true)
    }

    pub fn auto_optimize_off(self) -> Self {
        self.with_auto_optimize(false)
    }

    /// Makes [map_cached()](FutureStream::map_cached) stages consult `cache`.
    pub fn auto_memoize_on(self, cache: MemoizeCache) -> Self {
        Self {
            auto_memoize: true,
            memoize_cache: cache,
            ..self
        }
    }

    pub fn auto_memoize_off(self) -> Self {
        Self {
            auto_memoize: false,
            ..self
        }
    }

    pub(crate) fn dispatch(&self) -> Dispatch {
        Dispatch {
            executor: self.executor.clone(),
            is_async: self.is_async,
            auto_optimize: self.auto_optimize,
        }
    }

    fn construct<T>(&self, tasks: BoxStream<'static, Task<T>>) -> FutureStream<T>
    where
        T: 'static + Send,
    {
        debug!(react = ?self, "constructing stream");
        FutureStream::new(self.clone(), true, tasks)
    }

    /// Builds a stream over the given values.
    pub fn of<T, I>(&self, values: I) -> FutureStream<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static + Send,
        T: 'static + Send,
    {
        self.from_iter(values)
    }

    /// Builds a stream over the items of `iter`, pulled as the terminal operation demands.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<T, I>(&self, iter: I) -> FutureStream<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static + Send,
        T: 'static + Send,
    {
        self.construct(stream::iter(iter).map(Task::ready).boxed())
    }

    /// Builds a stream over the integers in `start..end`.
    pub fn range(&self, start: i64, end: i64) -> FutureStream<i64> {
        self.from_iter(start..end)
    }

    /// Builds a stream over the items of `stream`.
    pub fn from_stream<S>(&self, stream: S) -> FutureStream<S::Item>
    where
        S: 'static + Send + Stream,
        S::Item: 'static + Send,
    {
        self.construct(stream.map(Task::ready).boxed())
    }

    /// Builds a stream whose elements are the outputs of `suppliers`, each run on the executor.
    pub fn from_suppliers<T, I, F>(&self, suppliers: I) -> FutureStream<T>
    where
        I: IntoIterator<Item = F>,
        I::IntoIter: 'static + Send,
        F: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        self.from_stream_async(stream::iter(suppliers))
    }

    /// Builds a stream whose elements are the outputs of the suppliers yielded by `stream`.
    pub fn from_stream_async<T, S, F>(&self, stream: S) -> FutureStream<T>
    where
        S: 'static + Send + Stream<Item = F>,
        F: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let tasks = stream.map(|f| Task::Deferred(Box::new(move || Ok(Some(f())))));
        self.construct(tasks.boxed())
    }

    /// Builds a stream over the outputs of already created futures.
    pub fn from_futures<T, I, Fut>(&self, futures: I) -> FutureStream<T>
    where
        I: IntoIterator<Item = Fut>,
        I::IntoIter: 'static + Send,
        Fut: 'static + Send + Future<Output = T>,
        T: 'static + Send,
    {
        let tasks = stream::iter(futures)
            .map(|fut| Task::Awaiting(fut.map(Task::ready).boxed()));
        self.construct(tasks.boxed())
    }

    /// Builds a stream over the items offered to `adapter` from now on.
    pub fn from_adapter<T, A>(&self, adapter: &A) -> FutureStream<T>
    where
        A: Adapter<T>,
        T: 'static + Send,
    {
        self.from_stream(adapter.stream())
    }

    /// Builds the infinite stream `seed, f(seed), f(f(seed)), ...`.
    pub fn iterate<T, F>(&self, seed: T, mut f: F) -> FutureStream<T>
    where
        F: 'static + Send + FnMut(&T) -> T,
        T: 'static + Send,
    {
        self.from_iter(iter::successors(Some(seed), move |prev| Some(f(prev))))
    }

    /// Builds an infinite stream of values produced by `f` on the pulling side.
    pub fn generate<T, F>(&self, f: F) -> FutureStream<T>
    where
        F: 'static + Send + FnMut() -> T,
        T: 'static + Send,
    {
        self.from_iter(iter::repeat_with(f))
    }

    /// Builds an infinite stream of values produced by running `f` on the executor.
    pub fn generate_async<T, F>(&self, f: F) -> FutureStream<T>
    where
        F: 'static + Send + Sync + Fn() -> T,
        T: 'static + Send,
    {
        let f = Arc::new(f);
        self.from_stream_async(stream::repeat_with(move || {
            let f = f.clone();
            move || f()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queue::Queue, topic::Topic};

    fn react() -> LazyReact {
        LazyReact::new(Executor::current().unwrap())
    }

    #[tokio::test]
    async fn defaults_and_toggles() {
        let react = react();
        assert!(react.is_async());
        assert_eq!(react.max_active(), MaxActive::IO);
        assert!(!react.is_pooling_active());
        assert!(react.is_auto_optimize());
        assert!(!react.is_auto_memoize());
        assert_eq!(*react.retrier(), RetryPolicy::default());

        let tuned = react
            .clone()
            .sync_mode()
            .object_pooling_on()
            .auto_optimize_off()
            .auto_memoize_on(MemoizeCache::new())
            .with_max_active((4, 2))
            .with_retrier(Some(RetryPolicy::none()));
        assert!(!tuned.is_async());
        assert!(tuned.is_pooling_active());
        assert!(!tuned.is_auto_optimize());
        assert!(tuned.is_auto_memoize());
        assert_eq!(tuned.max_active(), MaxActive::new(4, 2));
        assert_eq!(tuned.retrier().max_attempts(), 1);

        let restored = tuned.with_retrier(None).auto_memoize_off().async_mode();
        assert_eq!(*restored.retrier(), RetryPolicy::default());
        assert!(!restored.is_auto_memoize());
        assert!(restored.is_async());

        let sequential = LazyReact::sequential_builder(react.executor().clone());
        assert!(!sequential.is_async());
        assert_eq!(sequential.max_active(), MaxActive::cpu());
    }

    #[test]
    fn owned_runtime_builders() {
        let react = LazyReact::with_threads(2, 8).unwrap();
        assert_eq!(react.max_active(), MaxActive::new(8, 2));
        assert_eq!(react.executor().num_workers(), Some(2));

        let parallel = LazyReact::parallel_builder(3).unwrap();
        assert_eq!(parallel.executor().num_workers(), Some(3));
        assert_eq!(parallel.range(0, 3).block().unwrap(), [0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sources_yield_in_order() {
        let react = react();

        assert_eq!(react.of(["a", "b"]).to_vec().await.unwrap(), ["a", "b"]);
        assert_eq!(
            react.from_stream(stream::iter(1..4)).to_vec().await.unwrap(),
            [1, 2, 3]
        );
        assert_eq!(
            react
                .from_suppliers((0..3).map(|value| move || value * 10))
                .to_vec()
                .await
                .unwrap(),
            [0, 10, 20]
        );
        assert_eq!(
            react
                .from_futures((0..3).map(|value| async move { value + 1 }))
                .to_vec()
                .await
                .unwrap(),
            [1, 2, 3]
        );
        assert_eq!(
            react
                .iterate(1, |prev| prev * 2)
                .limit(5)
                .to_vec()
                .await
                .unwrap(),
            [1, 2, 4, 8, 16]
        );

        let mut counter = 0;
        let generated = react
            .generate(move || {
                counter += 1;
                counter
            })
            .limit(3)
            .to_vec()
            .await
            .unwrap();
        assert_eq!(generated, [1, 2, 3]);

        let constant = react.generate_async(|| 'z').limit(4).to_vec().await.unwrap();
        assert_eq!(constant, ['z'; 4]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn adapters_feed_streams() {
        let react = react();

        let queue = Queue::unbounded();
        let from_queue = react.from_adapter(&queue);
        queue.offer_all(0..5).unwrap();
        queue.close();
        assert_eq!(from_queue.to_vec().await.unwrap(), [0, 1, 2, 3, 4]);

        let topic = Topic::new();
        let first = react.from_adapter(&topic).map(|value| value * 2);
        let second = react.from_adapter(&topic);
        topic.offer_all([1, 2]).unwrap();
        topic.close();
        assert_eq!(first.to_vec().await.unwrap(), [2, 4]);
        assert_eq!(second.to_vec().await.unwrap(), [1, 2]);
    }
}
