use crate::{
    common::*,
    config::MaxActive,
    error::{Error, Result},
};
use futures::stream::FuturesUnordered;

/// Output of a task tracked by a collector, paired with its submission index.
type Tracked<O> = BoxFuture<'static, (usize, Result<O>)>;

pub type EagerCollector<O> = ResultCollector<O, Eager<O>>;
pub type EmptyCollector<O> = ResultCollector<O, Empty>;
pub type LazyCollector<O> = ResultCollector<O, Lazy<O>>;

/// Admission control for in-flight tasks.
///
/// Each accepted task joins the active set. Once the set grows past the
/// [ceiling](MaxActive::ceiling), the collector drains completed tasks until
/// no more than [reduce_to](MaxActive::reduce_to) remain active, waiting for
/// completions if needed. Every outcome goes through the [ResultSink] exactly once.
#[derive(Derivative)]
#[derivative(Debug(bound = "S: Debug"))]
pub struct ResultCollector<O, S> {
    max_active: MaxActive,
    #[derivative(Debug = "ignore")]
    active: FuturesUnordered<Tracked<O>>,
    next_index: usize,
    sink: S,
}

impl<O, S> ResultCollector<O, S>
where
    O: 'static + Send,
    S: ResultSink<O>,
{
    pub fn new(max_active: MaxActive, sink: S) -> Self {
        Self {
            max_active,
            active: FuturesUnordered::new(),
            next_index: 0,
            sink,
        }
    }

    pub fn max_active(&self) -> MaxActive {
        self.max_active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Returns true if `n` more tasks can be accepted without draining.
    pub fn has_capacity(&self, n: usize) -> bool {
        self.active.len() + n <= self.max_active.ceiling()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Tracks a task, draining the active set if it exceeds the ceiling.
    ///
    /// A failure rejected by the sink during the drain is returned here.
    pub async fn accept<F>(&mut self, task: F) -> Result<()>
    where
        F: 'static + Send + Future<Output = Result<O>>,
    {
        let index = self.next_index;
        self.next_index += 1;
        self.active.push(task.map(move |outcome| (index, outcome)).boxed());

        if self.active.len() > self.max_active.ceiling() {
            self.drain(self.max_active.reduce_to()).await?;
        }
        Ok(())
    }

    /// Waits until one more task fits under the ceiling.
    ///
    /// Calling it before starting a task keeps the number of running tasks
    /// within the ceiling, not only the number of tracked ones.
    pub async fn reserve(&mut self) -> Result<()> {
        if !self.has_capacity(1) {
            self.drain(self.drain_target()).await?;
        }
        Ok(())
    }

    /// The active count a full collector drains down to before admitting more tasks.
    pub fn drain_target(&self) -> usize {
        let ceiling = self.max_active.ceiling();
        self.max_active.reduce_to().min(ceiling - 1)
    }

    async fn drain(&mut self, target: usize) -> Result<()> {
        let mut completed = 0;

        while self.active.len() > target {
            completed += self.drain_completed()?;

            let excess = self.active.len().saturating_sub(target);
            for _ in 0..excess {
                if !self.join_next().await? {
                    break;
                }
                completed += 1;
            }
        }

        trace!(completed, active = self.active.len(), "drained active tasks");
        Ok(())
    }

    /// Passes every already completed task to the sink without waiting.
    pub fn drain_completed(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(Some((index, outcome))) = self.active.next().now_or_never() {
            self.sink.safe_join(index, outcome)?;
            count += 1;
        }
        Ok(count)
    }

    /// Waits for the next task to complete and passes it to the sink.
    ///
    /// Returns `false` if no task is active.
    pub async fn join_next(&mut self) -> Result<bool> {
        match self.active.next().await {
            Some((index, outcome)) => {
                self.sink.safe_join(index, outcome)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Joins every remaining task and returns the sink output.
    pub async fn finish(mut self) -> Result<S::Output> {
        while self.join_next().await? {}
        Ok(self.sink.finish())
    }
}

impl<O> ResultCollector<O, Eager<O>>
where
    O: 'static + Send,
{
    /// A collector that returns every value in submission order.
    pub fn eager(max_active: MaxActive) -> Self {
        Self::new(max_active, Eager::default())
    }
}

impl<O> ResultCollector<O, Empty>
where
    O: 'static + Send,
{
    /// A collector that discards values and stops at the first failure.
    pub fn empty(max_active: MaxActive) -> Self {
        Self::new(max_active, Empty::default())
    }

    /// A collector that discards values and passes failures to `on_error`.
    pub fn empty_with_handler<F>(max_active: MaxActive, on_error: F) -> Self
    where
        F: 'static + Send + FnMut(Error),
    {
        Self::new(max_active, Empty::with_handler(on_error))
    }
}

impl<O> ResultCollector<O, Lazy<O>>
where
    O: 'static + Send,
{
    /// A collector that buffers outcomes for the caller to pop.
    pub fn lazy(max_active: MaxActive) -> Self {
        Self::new(max_active, Lazy::default())
    }
}

/// Receives completed task outcomes on behalf of a [ResultCollector].
pub trait ResultSink<O> {
    type Output;

    /// Takes the outcome of the task submitted at `index`.
    ///
    /// Returning an error aborts the collection.
    fn safe_join(&mut self, index: usize, outcome: Result<O>) -> Result<()>;

    fn finish(self) -> Self::Output;
}

pub use eager::*;

mod eager {
    use super::*;

    /// Stores values by submission index. The first failure aborts the collection.
    #[derive(Debug)]
    pub struct Eager<O> {
        slots: Vec<Option<O>>,
    }

    impl<O> Default for Eager<O> {
        fn default() -> Self {
            Self { slots: vec![] }
        }
    }

    impl<O> ResultSink<O> for Eager<O> {
        type Output = Vec<O>;

        fn safe_join(&mut self, index: usize, outcome: Result<O>) -> Result<()> {
            let value = outcome?;
            if self.slots.len() <= index {
                self.slots.resize_with(index + 1, || None);
            }
            self.slots[index] = Some(value);
            Ok(())
        }

        fn finish(self) -> Self::Output {
            self.slots.into_iter().flatten().collect()
        }
    }
}

pub use empty::*;

mod empty {
    use super::*;

    /// Discards values and counts completed tasks.
    ///
    /// Failures abort the collection unless an error handler is installed.
    #[derive(Derivative, Default)]
    #[derivative(Debug)]
    pub struct Empty {
        completed: usize,
        #[derivative(Debug = "ignore")]
        on_error: Option<Box<dyn FnMut(Error) + Send>>,
    }

    impl Empty {
        pub fn with_handler<F>(on_error: F) -> Self
        where
            F: 'static + Send + FnMut(Error),
        {
            Self {
                completed: 0,
                on_error: Some(Box::new(on_error)),
            }
        }

        pub fn completed(&self) -> usize {
            self.completed
        }
    }

    impl<O> ResultSink<O> for Empty {
        type Output = usize;

        fn safe_join(&mut self, _index: usize, outcome: Result<O>) -> Result<()> {
            self.completed += 1;
            match (outcome, &mut self.on_error) {
                (Ok(_), _) => Ok(()),
                (Err(err), Some(on_error)) => {
                    on_error(err);
                    Ok(())
                }
                (Err(err), None) => Err(err),
            }
        }

        fn finish(self) -> Self::Output {
            self.completed
        }
    }
}

pub use lazy::*;

mod lazy {
    use super::*;

    /// Buffers outcomes in completion order for pull-based consumption.
    #[derive(Debug)]
    pub struct Lazy<O> {
        ready: VecDeque<(usize, Result<O>)>,
    }

    impl<O> Default for Lazy<O> {
        fn default() -> Self {
            Self {
                ready: VecDeque::new(),
            }
        }
    }

    impl<O> Lazy<O> {
        pub fn pop(&mut self) -> Option<(usize, Result<O>)> {
            self.ready.pop_front()
        }

        pub fn len(&self) -> usize {
            self.ready.len()
        }

        pub fn is_empty(&self) -> bool {
            self.ready.is_empty()
        }
    }

    impl<O> ResultSink<O> for Lazy<O> {
        type Output = VecDeque<(usize, Result<O>)>;

        fn safe_join(&mut self, index: usize, outcome: Result<O>) -> Result<()> {
            self.ready.push_back((index, outcome));
            Ok(())
        }

        fn finish(self) -> Self::Output {
            self.ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt;

    #[tokio::test]
    async fn accept_drains_to_reduce_to() {
        let mut collector = ResultCollector::eager(MaxActive::new(3, 1));

        for value in 0..5 {
            collector.accept(async move { Ok(value) }).await.unwrap();
            assert!(collector.active_count() <= 3);
        }
        assert!(collector.active_count() <= 1);
        assert_eq!(collector.finish().await.unwrap(), [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn admission_bound_with_pending_tasks() {
        let max_active = MaxActive::new(3, 1);
        let mut collector = ResultCollector::eager(max_active);

        for value in 0..10u64 {
            let before = collector.active_count();
            collector
                .accept(async move {
                    rt::sleep(Duration::from_millis(10 - value)).await;
                    Ok(value)
                })
                .await
                .unwrap();

            let after = collector.active_count();
            assert!(after <= max_active.ceiling());
            if before == max_active.ceiling() {
                assert!(after <= max_active.reduce_to());
            }
        }

        itertools::assert_equal(collector.finish().await.unwrap(), 0..10u64);
    }

    #[tokio::test]
    async fn failures_surface_or_reach_handler() {
        let mut eager = ResultCollector::eager(MaxActive::IO);
        eager.accept(async { Ok(1) }).await.unwrap();
        eager
            .accept(async { Err(Error::from_task("broken")) })
            .await
            .unwrap();
        assert!(matches!(eager.finish().await, Err(Error::Task(_))));

        let errors = Arc::new(AtomicUsize::new(0));
        let mut empty = {
            let errors = errors.clone();
            ResultCollector::empty_with_handler(MaxActive::new(1, 0), move |_| {
                errors.fetch_add(1, SeqCst);
            })
        };
        for value in 0..4 {
            empty
                .accept(async move {
                    if value % 2 == 0 {
                        Ok(())
                    } else {
                        Err(Error::Cancelled)
                    }
                })
                .await
                .unwrap();
        }
        assert_eq!(empty.finish().await.unwrap(), 4);
        assert_eq!(errors.load(SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_collector_fails_during_drain() {
        let mut collector = ResultCollector::<(), _>::empty(MaxActive::new(1, 0));
        collector.accept(async { Err(Error::Cancelled) }).await.unwrap();
        let result = collector.accept(async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn reserve_makes_room_below_ceiling() {
        let mut collector = ResultCollector::eager(MaxActive::new(2, 2));
        collector.accept(async { Ok(0) }).await.unwrap();
        collector.accept(async { Ok(1) }).await.unwrap();
        assert_eq!(collector.active_count(), 2);
        assert_eq!(collector.drain_target(), 1);
        assert_eq!(ResultCollector::<(), _>::empty(MaxActive::new(4, 1)).drain_target(), 1);

        collector.reserve().await.unwrap();
        assert!(collector.has_capacity(1));
        collector.accept(async { Ok(2) }).await.unwrap();
        assert_eq!(collector.finish().await.unwrap(), [0, 1, 2]);
    }

    #[tokio::test]
    async fn lazy_collector_buffers_outcomes() {
        let mut collector = ResultCollector::lazy(MaxActive::new(2, 2));
        assert!(collector.has_capacity(2));

        collector.accept(async { Ok('a') }).await.unwrap();
        collector.accept(async { Ok('b') }).await.unwrap();
        assert!(!collector.has_capacity(1));

        while collector.join_next().await.unwrap() {}
        let mut indexes: Vec<_> = iter::from_fn(|| collector.sink_mut().pop())
            .map(|(index, outcome)| (index, outcome.unwrap()))
            .collect();
        indexes.sort();
        assert_eq!(indexes, [(0, 'a'), (1, 'b')]);
    }
}
