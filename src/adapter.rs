use crate::{
    common::*,
    error::{Error, Result},
    queue::{Queue, QueueStream},
    topic::Topic,
};

/// A push-to-pull bridge that producers offer items to and consumers read as a stream.
pub trait Adapter<T> {
    /// Pushes an item, waiting if the adapter applies backpressure.
    fn offer(&self, item: T) -> Result<()>;

    /// Closes the adapter. Consumers drain what was offered, then end.
    fn close(&self) -> bool;

    /// Returns a stream over the items offered from now on.
    fn stream(&self) -> QueueStream<T>;

    fn offer_all<I>(&self, items: I) -> Result<()>
    where
        Self: Sized,
        I: IntoIterator<Item = T>,
    {
        items.into_iter().try_for_each(|item| self.offer(item))
    }
}

impl<T> Adapter<T> for Queue<T>
where
    T: 'static + Send,
{
    fn offer(&self, item: T) -> Result<()> {
        Queue::offer(self, item).map_err(Error::from)
    }

    fn close(&self) -> bool {
        Queue::close(self)
    }

    fn stream(&self) -> QueueStream<T> {
        Queue::stream(self)
    }
}

impl<T> Adapter<T> for Topic<T>
where
    T: 'static + Send + Clone,
{
    fn offer(&self, item: T) -> Result<()> {
        Topic::offer(self, item)
    }

    fn close(&self) -> bool {
        Topic::close(self)
    }

    /// Subscribes to the topic and returns the subscriber stream.
    fn stream(&self) -> QueueStream<T> {
        self.subscribe().into_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain<A>(adapter: &A) -> Vec<u32>
    where
        A: Adapter<u32>,
    {
        let stream = adapter.stream();
        adapter.offer_all([1, 2, 3]).unwrap();
        adapter.close();
        stream.collect().await
    }

    #[tokio::test]
    async fn queue_and_topic_adapt_alike() {
        assert_eq!(drain(&Queue::unbounded()).await, [1, 2, 3]);
        assert_eq!(drain(&Topic::new()).await, [1, 2, 3]);
    }
}
