//! Element representation inside a [FutureStream](crate::FutureStream).
//!
//! Each element carries the work recorded for it so far. `Ready` elements
//! hold an outcome, `Deferred` elements hold blocking work that has not run,
//! and `Awaiting` elements hold asynchronous work that yields the next state.
//! A `None` outcome marks an element dropped by a filter.

use crate::{common::*, error::Result, executor::Executor};

pub(crate) type TaskOutput<T> = Result<Option<T>>;
pub(crate) type BoxFn<T> = Box<dyn FnOnce() -> T + Send>;

/// How elements are scheduled.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub executor: Executor,
    pub is_async: bool,
    pub auto_optimize: bool,
}

impl Dispatch {
    /// Element stages run back to back in one executor hop.
    pub fn fuses(&self) -> bool {
        !self.is_async || self.auto_optimize
    }

    /// The same executor, running blocking work on the calling thread.
    pub fn inline(&self) -> Self {
        Self {
            is_async: false,
            ..self.clone()
        }
    }
}

pub(crate) enum Task<T> {
    Ready(TaskOutput<T>),
    Deferred(BoxFn<TaskOutput<T>>),
    Awaiting(BoxFuture<'static, Task<T>>),
}

impl<T> Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Task::Ready(_) => "Ready",
            Task::Deferred(_) => "Deferred",
            Task::Awaiting(_) => "Awaiting",
        };
        f.debug_tuple("Task").field(&state).finish()
    }
}

impl<T> Task<T>
where
    T: 'static + Send,
{
    pub fn ready(value: T) -> Self {
        Task::Ready(Ok(Some(value)))
    }

    /// Appends blocking work that consumes the outcome of this task.
    pub fn and_then<R, G>(self, dispatch: &Dispatch, g: G) -> Task<R>
    where
        R: 'static + Send,
        G: 'static + Send + FnOnce(TaskOutput<T>) -> TaskOutput<R>,
    {
        if dispatch.fuses() {
            match self {
                Task::Ready(output) => Task::Deferred(Box::new(move || g(output))),
                Task::Deferred(f) => Task::Deferred(Box::new(move || g(f()))),
                Task::Awaiting(fut) => {
                    let dispatch = dispatch.clone();
                    Task::Awaiting(async move { fut.await.and_then(&dispatch, g) }.boxed())
                }
            }
        } else {
            let resolved = self.resolve(dispatch);
            Task::Awaiting(
                async move {
                    let output = resolved.await;
                    Task::Deferred(Box::new(move || g(output)))
                }
                .boxed(),
            )
        }
    }

    /// Appends asynchronous work that consumes the outcome of this task.
    pub fn and_then_async<R, G, Fut>(self, dispatch: &Dispatch, g: G) -> Task<R>
    where
        R: 'static + Send,
        G: 'static + Send + FnOnce(TaskOutput<T>) -> Fut,
        Fut: 'static + Send + Future<Output = TaskOutput<R>>,
    {
        let resolved = self.resolve(dispatch);
        Task::Awaiting(async move { Task::Ready(g(resolved.await).await) }.boxed())
    }

    /// Runs the task to its outcome.
    ///
    /// Blocking work goes to the executor's blocking pool in async mode and
    /// runs on the polling thread otherwise.
    pub fn resolve(self, dispatch: &Dispatch) -> BoxFuture<'static, TaskOutput<T>> {
        let dispatch = dispatch.clone();

        async move {
            let mut task = self;
            loop {
                task = match task {
                    Task::Ready(output) => break output,
                    Task::Deferred(f) if dispatch.is_async => {
                        break dispatch.executor.spawn_blocking(f).await?;
                    }
                    Task::Deferred(f) => break f(),
                    Task::Awaiting(fut) => fut.await,
                };
            }
        }
        .boxed()
    }

    /// Starts the task and returns its eventual outcome.
    ///
    /// In async mode the work is handed to the executor right away, so it
    /// makes progress whether or not the returned future is polled.
    pub fn submit(self, dispatch: &Dispatch) -> BoxFuture<'static, TaskOutput<T>> {
        match self {
            Task::Ready(output) => future::ready(output).boxed(),
            task if !dispatch.is_async => task.resolve(dispatch),
            Task::Deferred(f) => {
                let handle = dispatch.executor.spawn_blocking(f);
                async move { handle.await? }.boxed()
            }
            task => {
                let handle = dispatch.executor.spawn(task.resolve(dispatch));
                async move { handle.await? }.boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn dispatch(is_async: bool, auto_optimize: bool) -> Dispatch {
        Dispatch {
            executor: Executor::current().unwrap(),
            is_async,
            auto_optimize,
        }
    }

    fn double(output: TaskOutput<u32>) -> TaskOutput<u32> {
        output.map(|value| value.map(|value| value * 2))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stages_compose_in_every_mode() {
        for (is_async, auto_optimize) in [(true, true), (true, false), (false, false)] {
            let dispatch = dispatch(is_async, auto_optimize);
            let task = Task::ready(3)
                .and_then(&dispatch, double)
                .and_then_async(&dispatch, |output| async move { double(output) })
                .and_then(&dispatch, double);

            assert_eq!(task.submit(&dispatch).await.unwrap(), Some(24));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fused_stages_stay_deferred() {
        let dispatch = dispatch(true, true);
        let task = Task::ready(1).and_then(&dispatch, double).and_then(&dispatch, double);
        assert!(matches!(task, Task::Deferred(_)));

        let unfused = dispatch.inline();
        assert!(!unfused.is_async);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panics_become_errors_in_async_mode() {
        let dispatch = dispatch(true, true);
        let task = Task::ready(1u32).and_then(&dispatch, |_| -> TaskOutput<u32> {
            panic!("stage failed")
        });

        match task.submit(&dispatch).await {
            Err(Error::Panicked(message)) => assert_eq!(message, "stage failed"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
