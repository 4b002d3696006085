//! Long-lived blocking workers used when object pooling is on.

use crate::{
    collector::ResultSink,
    common::*,
    error::Result,
    task::{Dispatch, Task, TaskOutput},
    utils,
};

/// Runs the tasks of `tasks` on `num_workers` blocking workers.
///
/// The outcomes arrive in completion order, paired with the submission index.
/// Workers stop once the returned receiver is dropped.
pub(crate) fn spawn_workers<T>(
    tasks: BoxStream<'static, Task<T>>,
    dispatch: &Dispatch,
    num_workers: usize,
) -> flume::Receiver<(usize, TaskOutput<T>)>
where
    T: 'static + Send,
{
    let (task_tx, task_rx) = utils::channel(num_workers);
    let (output_tx, output_rx) = utils::channel(num_workers);
    let executor = &dispatch.executor;

    executor.spawn(async move {
        let mut tasks = tasks.enumerate();
        while let Some(item) = tasks.next().await {
            if task_tx.send_async(item).await.is_err() {
                break;
            }
        }
    });

    (0..num_workers).for_each(|worker_index| {
        let task_rx: flume::Receiver<(usize, Task<T>)> = task_rx.clone();
        let output_tx = output_tx.clone();
        let inline = dispatch.inline();
        let handle = executor.handle().clone();

        executor.spawn_blocking(move || {
            while let Ok((index, task)) = task_rx.recv() {
                let output = handle.block_on(task.resolve(&inline));
                if output_tx.send((index, output)).is_err() {
                    break;
                }
            }
            trace!(worker_index, "pooled worker finished");
        });
    });

    debug!(num_workers, "started pooled workers");
    output_rx
}

/// Feeds pooled outcomes to `sink` until the workers finish or the sink fails.
pub(crate) async fn execute<T, S>(
    outputs: flume::Receiver<(usize, TaskOutput<T>)>,
    mut sink: S,
) -> Result<S::Output>
where
    S: ResultSink<Option<T>>,
{
    while let Ok((index, output)) = outputs.recv_async().await {
        sink.safe_join(index, output)?;
    }
    Ok(sink.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collector::Eager, executor::Executor};

    #[tokio::test(flavor = "multi_thread")]
    async fn workers_preserve_indexes() {
        let dispatch = Dispatch {
            executor: Executor::current().unwrap(),
            is_async: true,
            auto_optimize: true,
        };
        let tasks = {
            let dispatch = dispatch.clone();
            stream::iter(0..20u64)
                .map(move |value| {
                    Task::ready(value).and_then(&dispatch, move |output| {
                        std::thread::sleep(Duration::from_millis(20 - value));
                        output.map(|value| value.map(|value| value + 1))
                    })
                })
                .boxed()
        };

        let outputs = spawn_workers(tasks, &dispatch, 4);
        let values = execute(outputs, Eager::default()).await.unwrap();
        itertools::assert_equal(values.into_iter().flatten(), 1..21u64);
    }
}
