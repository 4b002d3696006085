//! Timer and task handle types shared by the executor.

use crate::{common::*, error::Error};

/// Suspends the current task for `dur`.
pub async fn sleep(dur: Duration) {
    tokio::time::sleep(dur).await;
}

/// A handle to a spawned task whose output reports panics and cancellation as [Error].
#[derive(Debug)]
#[repr(transparent)]
pub struct JoinHandle<T>(pub(crate) tokio::task::JoinHandle<T>);

impl<T> JoinHandle<T> {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    pub fn abort(&self) {
        self.0.abort();
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.map_err(Error::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[tokio::test]
    async fn join_handle_reports_panics() {
        let executor = Executor::current().unwrap();
        let ok = executor.spawn(async { 1 + 1 });
        assert_eq!(ok.await.unwrap(), 2);

        let failed = executor.spawn_blocking(|| -> usize { panic!("worker blew up") });
        match failed.await {
            Err(Error::Panicked(message)) => assert_eq!(message, "worker blew up"),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn aborted_task_is_cancelled() {
        let handle = Executor::current().unwrap().spawn(async {
            sleep(Duration::from_secs(60)).await;
        });
        handle.abort();
        assert!(matches!(handle.await, Err(Error::Cancelled)));
    }
}
