use crate::{
    common::*,
    config::Count,
    error::{Error, Result},
    rt::JoinHandle,
};
use tokio::runtime::{Builder, Handle, Runtime};

/// The execution context that runs submitted work.
///
/// An executor either owns a tokio runtime, created by [Executor::new], or
/// borrows the handle of a runtime owned elsewhere. Clones share the same
/// runtime. An owned runtime is shut down when the last clone is dropped.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Executor {
    #[derivative(Debug = "ignore")]
    handle: Handle,
    num_workers: Option<usize>,
    #[derivative(Debug = "ignore")]
    runtime: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl Executor {
    /// Starts a multi-threaded runtime with `num_workers` worker threads.
    pub fn new<C>(num_workers: C) -> Result<Self>
    where
        C: Into<Count>,
    {
        let num_workers = num_workers.into().to_absolute();
        let runtime = Builder::new_multi_thread()
            .worker_threads(num_workers)
            .thread_name("lazy-react-worker")
            .enable_time()
            .build()?;
        debug!(num_workers, "started executor runtime");

        Ok(Self {
            handle: runtime.handle().clone(),
            num_workers: Some(num_workers),
            runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Wraps the handle of a runtime owned by the caller.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            num_workers: None,
            runtime: None,
        }
    }

    /// Borrows the runtime the calling thread is running in.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|err| Error::NoRuntime(err.to_string()))?;
        Ok(Self::from_handle(handle))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The number of worker threads, if this executor owns its runtime.
    pub fn num_workers(&self) -> Option<usize> {
        self.num_workers
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: 'static + Future + Send,
        F::Output: 'static + Send,
    {
        JoinHandle(self.handle.spawn(future))
    }

    pub fn spawn_blocking<F, R>(&self, f: F) -> JoinHandle<R>
    where
        F: 'static + Send + FnOnce() -> R,
        R: 'static + Send,
    {
        JoinHandle(self.handle.spawn_blocking(f))
    }

    /// Runs a future to completion on this executor, blocking the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        self.handle.block_on(future)
    }

    /// Shuts down the owned runtime, waiting at most `timeout` for blocking work.
    ///
    /// Returns `true` if the runtime was shut down. Borrowed runtimes and
    /// runtimes still shared by other clones are left running.
    pub fn shutdown(self, timeout: Duration) -> bool {
        let owned = match self.runtime {
            Some(runtime) => runtime,
            None => return false,
        };

        match Arc::try_unwrap(owned) {
            Ok(mut owned) => {
                if let Some(runtime) = owned.0.take() {
                    runtime.shutdown_timeout(timeout);
                }
                debug!("executor runtime shut down");
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_runtime_runs_work() {
        let executor = Executor::new(2).unwrap();
        assert_eq!(executor.num_workers(), Some(2));

        let sum = executor.block_on(async {
            let a = executor.spawn(async { 40 });
            let b = executor.spawn_blocking(|| 2);
            a.await.unwrap() + b.await.unwrap()
        });
        assert_eq!(sum, 42);

        let clone = executor.clone();
        assert!(!clone.shutdown(Duration::from_secs(1)));
        assert!(executor.shutdown(Duration::from_secs(1)));
    }

    #[test]
    fn current_requires_a_runtime() {
        assert!(matches!(Executor::current(), Err(Error::NoRuntime(_))));
    }

    #[tokio::test]
    async fn current_borrows_ambient_runtime() {
        let executor = Executor::current().unwrap();
        assert_eq!(executor.num_workers(), None);
        assert_eq!(executor.spawn(async { 7 }).await.unwrap(), 7);
        assert!(!executor.shutdown(Duration::from_millis(10)));
    }
}
