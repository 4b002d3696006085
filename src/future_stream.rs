use crate::{
    collector::{Eager, Empty, Lazy, ResultCollector, ResultSink},
    common::*,
    error::{BoxError, Error, Result},
    index_stream::IndexStreamExt as _,
    memoize::StageId,
    pool,
    queue::Queue,
    react::LazyReact,
    task::{Dispatch, Task, TaskOutput},
};

/// A lazily evaluated pipeline of per-element work.
///
/// Stages record work for each element without running it. A terminal
/// operation pulls the source, submits the work of each element to the
/// executor under the builder's [MaxActive](crate::MaxActive) thresholds and
/// collects the outcomes. The first failure not handled by
/// [recover()](FutureStream::recover) ends the terminal operation.
///
/// ```rust
/// # lazy_react::Executor::new(2).unwrap().block_on(async {
/// use lazy_react::{Executor, LazyReact};
///
/// let react = LazyReact::new(Executor::current().unwrap());
/// let values = react
///     .of([1, 2, 3, 4])
///     .map(|value| value * 10)
///     .filter(|value| *value > 10)
///     .to_vec()
///     .await
///     .unwrap();
/// assert_eq!(values, [20, 30, 40]);
/// # })
/// ```
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FutureStream<T> {
    react: LazyReact,
    exact: bool,
    #[derivative(Debug = "ignore")]
    tasks: BoxStream<'static, Task<T>>,
}

fn lift<T, R, F>(output: TaskOutput<T>, f: F) -> TaskOutput<R>
where
    F: FnOnce(T) -> Result<R>,
{
    match output {
        Ok(Some(value)) => f(value).map(Some),
        Ok(None) => Ok(None),
        Err(err) => Err(err),
    }
}

impl<T> FutureStream<T>
where
    T: 'static + Send,
{
    pub(crate) fn new(react: LazyReact, exact: bool, tasks: BoxStream<'static, Task<T>>) -> Self {
        Self {
            react,
            exact,
            tasks,
        }
    }

    pub fn react(&self) -> &LazyReact {
        &self.react
    }

    /// Runs the remaining stages and the terminal operation asynchronously.
    pub fn async_mode(self) -> Self {
        Self {
            react: self.react.async_mode(),
            ..self
        }
    }

    /// Runs the remaining stages and the terminal operation on the pulling thread.
    pub fn sync_mode(self) -> Self {
        Self {
            react: self.react.sync_mode(),
            ..self
        }
    }

    fn stage<R, G>(self, exact: bool, g: G) -> FutureStream<R>
    where
        R: 'static + Send,
        G: 'static + Send + Sync + Fn(TaskOutput<T>) -> TaskOutput<R>,
    {
        let Self {
            react,
            exact: was_exact,
            tasks,
        } = self;
        let dispatch = react.dispatch();
        let g = Arc::new(g);

        let tasks = tasks
            .map(move |task| {
                let g = g.clone();
                task.and_then(&dispatch, move |output| g(output))
            })
            .boxed();

        FutureStream::new(react, was_exact && exact, tasks)
    }

    /// Transforms each element.
    pub fn map<R, F>(self, f: F) -> FutureStream<R>
    where
        R: 'static + Send,
        F: 'static + Send + Sync + Fn(T) -> R,
    {
        self.stage(true, move |output| lift(output, |value| Ok(f(value))))
    }

    /// Transforms each element with fallible work. A failure fails the element.
    pub fn try_map<R, E, F>(self, f: F) -> FutureStream<R>
    where
        R: 'static + Send,
        E: Into<BoxError>,
        F: 'static + Send + Sync + Fn(T) -> Result<R, E>,
    {
        self.stage(true, move |output| {
            lift(output, |value| f(value).map_err(Error::from_task))
        })
    }

    /// Keeps the elements satisfying `predicate`.
    pub fn filter<P>(self, predicate: P) -> FutureStream<T>
    where
        P: 'static + Send + Sync + Fn(&T) -> bool,
    {
        self.stage(false, move |output| {
            output.map(|value| value.filter(|value| predicate(value)))
        })
    }

    /// Calls `f` on each element as it passes.
    pub fn peek<F>(self, f: F) -> FutureStream<T>
    where
        F: 'static + Send + Sync + Fn(&T),
    {
        self.stage(true, move |output| {
            if let Ok(Some(value)) = &output {
                f(value);
            }
            output
        })
    }

    /// Transforms each element with fallible work, retried per the builder's [RetryPolicy](crate::RetryPolicy).
    pub fn retry<R, E, F>(self, f: F) -> FutureStream<R>
    where
        T: Clone,
        R: 'static + Send,
        E: Into<BoxError>,
        F: 'static + Send + Sync + Fn(T) -> Result<R, E>,
    {
        let policy = *self.react.retrier();
        self.stage(true, move |output| {
            lift(output, |value| {
                policy
                    .run(|| f(value.clone()))
                    .map_err(Error::from_task)
            })
        })
    }

    /// Replaces every failed element by the value `f` computes from the failure.
    pub fn recover<F>(self, f: F) -> FutureStream<T>
    where
        F: 'static + Send + Sync + Fn(Error) -> T,
    {
        self.stage(true, move |output| match output {
            Err(err) => Ok(Some(f(err))),
            output => output,
        })
    }

    /// Replaces failed elements whose cause is an `E`. Other failures pass through.
    pub fn recover_with<E, F>(self, f: F) -> FutureStream<T>
    where
        E: 'static + std::error::Error,
        F: 'static + Send + Sync + Fn(&E) -> T,
    {
        self.stage(true, move |output| match output {
            Err(err) => {
                if let Some(cause) = err.downcast_ref::<E>() {
                    return Ok(Some(f(cause)));
                }
                Err(err)
            }
            output => output,
        })
    }

    /// Like [map()](FutureStream::map), but reuses earlier outputs for equal inputs
    /// when the builder has auto-memoize on.
    pub fn map_cached<R, F>(self, f: F) -> FutureStream<R>
    where
        T: Hash + Eq + Clone + Sync,
        R: 'static + Send + Sync + Clone,
        F: 'static + Send + Sync + Fn(T) -> R,
    {
        if !self.react.is_auto_memoize() {
            return self.map(f);
        }

        let cache = self.react.memoize_cache().clone();
        let stage = StageId::next();
        self.map(move |value| cache.compute_if_absent(stage, &value, |value| f(value.clone())))
    }

    /// Transforms each element with asynchronous work.
    pub fn then<R, F, Fut>(self, f: F) -> FutureStream<R>
    where
        R: 'static + Send,
        F: 'static + Send + Sync + Fn(T) -> Fut,
        Fut: 'static + Send + Future<Output = R>,
    {
        let Self {
            react,
            exact,
            tasks,
        } = self;
        let dispatch = react.dispatch();
        let f = Arc::new(f);

        let tasks = tasks
            .map(move |task| {
                let f = f.clone();
                task.and_then_async(&dispatch, move |output| async move {
                    match output {
                        Ok(Some(value)) => Ok(Some(f(value).await)),
                        Ok(None) => Ok(None),
                        Err(err) => Err(err),
                    }
                })
            })
            .boxed();

        FutureStream::new(react, exact, tasks)
    }

    /// Completes the elements and funnels their outcomes into one stream.
    ///
    /// In async mode a spawned task drives the pipeline into a bounded queue
    /// once the returned stream is first polled.
    fn fan_in(self) -> (LazyReact, BoxStream<'static, Result<T>>) {
        let react = self.react.clone();
        if !react.is_async() {
            return (react, self.into_stream());
        }

        let results = stream::once(async move { self.into_queue().exclusive_stream() })
            .flatten()
            .boxed();
        (react, results)
    }

    /// Replaces each element by the items `f` returns, re-synchronizing the pipeline.
    pub fn flat_map<R, I, F>(self, f: F) -> FutureStream<R>
    where
        R: 'static + Send,
        I: IntoIterator<Item = R>,
        F: 'static + Send + Sync + Fn(T) -> I,
    {
        let (react, results) = self
            .map(move |value| f(value).into_iter().collect::<Vec<_>>())
            .fan_in();

        let tasks = results
            .flat_map(|result| {
                let tasks: Vec<_> = match result {
                    Ok(values) => values.into_iter().map(Task::ready).collect(),
                    Err(err) => vec![Task::Ready(Err(err))],
                };
                stream::iter(tasks)
            })
            .boxed();
        FutureStream::new(react, false, tasks)
    }

    /// Batches completed elements into groups of `size`. The last group may be shorter.
    ///
    /// A group containing a failed element fails as a whole.
    pub fn grouped(self, size: usize) -> FutureStream<Vec<T>> {
        assert!(size > 0, "group size must be positive");
        let (react, results) = self.fan_in();

        let tasks = results
            .chunks(size)
            .map(|group| Task::Ready(group.into_iter().collect::<Result<Vec<_>>>().map(Some)))
            .boxed();
        FutureStream::new(react, false, tasks)
    }

    /// Interleaves the completed elements of both streams in completion order.
    pub fn merge(self, other: FutureStream<T>) -> FutureStream<T> {
        let (react, left) = self.fan_in();
        let (_, right) = other.fan_in();

        let tasks = stream::select(left, right)
            .map(|result| Task::Ready(result.map(Some)))
            .boxed();
        FutureStream::new(react, false, tasks)
    }

    /// Keeps the first `n` elements.
    pub fn limit(self, n: usize) -> FutureStream<T> {
        if self.exact {
            return Self {
                tasks: self.tasks.take(n).boxed(),
                ..self
            };
        }

        let (react, results) = self.fan_in();
        let tasks = results
            .take(n)
            .map(|result| Task::Ready(result.map(Some)))
            .boxed();
        FutureStream::new(react, false, tasks)
    }

    /// Drops the first `n` elements.
    pub fn skip(self, n: usize) -> FutureStream<T> {
        if self.exact {
            return Self {
                tasks: self.tasks.skip(n).boxed(),
                ..self
            };
        }

        let (react, results) = self.fan_in();
        let tasks = results
            .skip(n)
            .map(|result| Task::Ready(result.map(Some)))
            .boxed();
        FutureStream::new(react, false, tasks)
    }

    /// Submits every element and passes the outcomes to `sink`.
    async fn collect_into<S>(self, sink: S) -> Result<S::Output>
    where
        S: ResultSink<Option<T>>,
    {
        let Self {
            react, mut tasks, ..
        } = self;
        let dispatch = react.dispatch();
        let max_active = react.max_active();

        if react.is_pooling_active() && react.is_async() {
            let outputs = pool::spawn_workers(tasks, &dispatch, max_active.ceiling());
            return pool::execute(outputs, sink).await;
        }

        let mut collector = ResultCollector::new(max_active, sink);
        while let Some(task) = tasks.next().await {
            collector.reserve().await?;
            collector.accept(task.submit(&dispatch)).await?;
        }
        collector.finish().await
    }

    /// Runs the pipeline and returns the values in submission order.
    pub async fn to_vec(self) -> Result<Vec<T>> {
        let values = self.collect_into(Eager::default()).await?;
        Ok(values.into_iter().flatten().collect())
    }

    /// Runs the pipeline on the builder's executor, blocking the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn block(self) -> Result<Vec<T>> {
        let executor = self.react.executor().clone();
        executor.block_on(self.to_vec())
    }

    /// Runs the pipeline for its side effects, stopping at the first failure.
    ///
    /// Returns the number of completed elements, filtered elements included.
    pub async fn run_async(self) -> Result<usize> {
        self.collect_into(Empty::default()).await
    }

    /// Blocking counterpart of [run_async()](FutureStream::run_async).
    pub fn run(self) -> Result<usize> {
        let executor = self.react.executor().clone();
        executor.block_on(self.run_async())
    }

    /// Runs the pipeline for its side effects, passing failures to `on_error`.
    pub async fn run_with_errors<F>(self, on_error: F) -> Result<usize>
    where
        F: 'static + Send + FnMut(Error),
    {
        self.collect_into(Empty::with_handler(on_error)).await
    }

    /// Calls `f` on each value in completion order, stopping at the first failure.
    pub async fn for_each_async<F>(self, mut f: F) -> Result<()>
    where
        F: FnMut(T),
    {
        let mut results = self.into_stream();
        while let Some(result) = results.next().await {
            f(result?);
        }
        Ok(())
    }

    /// Blocking counterpart of [for_each_async()](FutureStream::for_each_async).
    pub fn for_each<F>(self, f: F) -> Result<()>
    where
        F: FnMut(T),
    {
        let executor = self.react.executor().clone();
        executor.block_on(self.for_each_async(f))
    }

    /// Calls `f` on each value and `on_error` on each failure, in completion order.
    pub async fn for_each_with_errors<F, H>(self, mut f: F, mut on_error: H)
    where
        F: FnMut(T),
        H: FnMut(Error),
    {
        let mut results = self.into_stream();
        while let Some(result) = results.next().await {
            match result {
                Ok(value) => f(value),
                Err(err) => on_error(err),
            }
        }
    }

    /// Runs the pipeline and yields `(submission index, outcome)` pairs in completion order.
    fn into_indexed_stream(self) -> BoxStream<'static, (usize, TaskOutput<T>)> {
        let Self { react, tasks, .. } = self;
        let dispatch = react.dispatch();
        let max_active = react.max_active();

        if !react.is_async() {
            return tasks
                .enumerate()
                .then(move |(index, task)| task.resolve(&dispatch).map(move |output| (index, output)))
                .boxed();
        }

        if react.is_pooling_active() {
            return pool::spawn_workers(tasks, &dispatch, max_active.ceiling())
                .into_stream()
                .boxed();
        }

        struct State<T> {
            tasks: BoxStream<'static, Task<T>>,
            collector: ResultCollector<Option<T>, Lazy<Option<T>>>,
            dispatch: Dispatch,
            exhausted: bool,
            draining: Option<usize>,
        }

        enum Step<T> {
            Pulled(Option<Task<T>>),
            Joined(bool),
        }

        let state = State {
            tasks,
            collector: ResultCollector::lazy(max_active),
            dispatch,
            exhausted: false,
            draining: None,
        };

        // The lazy sink never rejects an outcome, so collector calls cannot fail.
        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.collector.sink_mut().pop() {
                    return Some((item, state));
                }

                // A full collector joins down to its drain target before pulling again.
                if let Some(target) = state.draining {
                    if state.collector.active_count() <= target {
                        state.draining = None;
                    }
                }
                if state.draining.is_none()
                    && !state.exhausted
                    && !state.collector.has_capacity(1)
                {
                    state.draining = Some(state.collector.drain_target());
                }

                let can_pull = !state.exhausted && state.draining.is_none();
                let step = if !can_pull {
                    Step::Joined(state.collector.join_next().await.unwrap_or(false))
                } else if state.collector.active_count() == 0 {
                    Step::Pulled(state.tasks.next().await)
                } else {
                    tokio::select! {
                        task = state.tasks.next() => Step::Pulled(task),
                        joined = state.collector.join_next() => Step::Joined(joined.unwrap_or(false)),
                    }
                };

                match step {
                    Step::Pulled(Some(task)) => {
                        let _ = state.collector.accept(task.submit(&state.dispatch)).await;
                    }
                    Step::Pulled(None) => state.exhausted = true,
                    Step::Joined(true) => {}
                    Step::Joined(false) => {
                        if state.exhausted {
                            return None;
                        }
                    }
                }
            }
        })
        .boxed()
    }

    /// Runs the pipeline and yields the values in completion order.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        self.into_indexed_stream()
            .filter_map(|(_, output)| future::ready(output.transpose()))
            .boxed()
    }

    /// Runs the pipeline and yields the values in submission order.
    pub fn into_ordered_stream(self) -> BoxStream<'static, Result<T>> {
        self.into_indexed_stream()
            .reorder_enumerated()
            .filter_map(|output| future::ready(output.transpose()))
            .boxed()
    }

    /// Runs the pipeline in a spawned task that offers the outcomes to a bounded queue.
    ///
    /// The queue holds up to the [ceiling](crate::MaxActive::ceiling) outcomes
    /// and is closed once the pipeline ends. Closing the queue stops the task.
    pub fn into_queue(self) -> Queue<Result<T>> {
        let queue = Queue::bounded(self.react.max_active().ceiling());
        let executor = self.react.executor().clone();
        let results = self.into_stream();

        let sink = queue.clone();
        executor.spawn(async move {
            if sink.from_stream(results).await.is_err() {
                trace!("result queue closed by its consumer");
            }
            sink.close();
        });

        queue
    }
}

/// The trait extends [Stream](futures::stream::Stream) types with a conversion into [FutureStream].
pub trait FutureStreamExt
where
    Self: 'static + Send + Stream + Sized,
    Self::Item: 'static + Send,
{
    /// Turns the stream into the source of a pipeline built by `react`.
    fn into_future_stream(self, react: &LazyReact) -> FutureStream<Self::Item> {
        react.from_stream(self)
    }
}

impl<S> FutureStreamExt for S
where
    S: 'static + Send + Stream,
    S::Item: 'static + Send,
{
}
