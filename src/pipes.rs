use crate::{
    common::*,
    error::{Error, Result},
    future_stream::FutureStream,
    queue::{Queue, QueueStream},
    react::LazyReact,
};
use dashmap::DashMap;

/// A registry that routes items to queues by key.
///
/// Producers push to a key, consumers read the queue registered for it.
/// Clones share the same registry.
///
/// ```rust
/// use lazy_react::{Pipes, Queue};
///
/// let pipes = Pipes::new();
/// pipes.register("orders", Queue::unbounded());
/// pipes.push(&"orders", 7).unwrap();
/// pipes.close(&"orders");
///
/// let queue = pipes.get(&"orders").unwrap();
/// assert_eq!(queue.iter().collect::<Vec<_>>(), [7]);
/// assert!(pipes.push(&"payments", 1).is_err());
/// ```
pub struct Pipes<K, T>
where
    K: Hash + Eq,
{
    registry: Arc<DashMap<K, Queue<T>>>,
}

impl<K, T> Clone for Pipes<K, T>
where
    K: Hash + Eq,
{
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<K, T> Default for Pipes<K, T>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
        }
    }
}

impl<K, T> Debug for Pipes<K, T>
where
    K: Hash + Eq + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<_> = self.registry.iter().map(|entry| format!("{:?}", entry.key())).collect();
        f.debug_struct("Pipes").field("keys", &keys).finish()
    }
}

impl<K, T> Pipes<K, T>
where
    K: Hash + Eq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `queue` under `key`, returning the queue it replaces.
    pub fn register(&self, key: K, queue: Queue<T>) -> Option<Queue<T>> {
        self.registry.insert(key, queue)
    }

    /// Removes the queue under `key` without closing it.
    pub fn deregister(&self, key: &K) -> Option<Queue<T>> {
        self.registry.remove(key).map(|(_, queue)| queue)
    }

    pub fn get(&self, key: &K) -> Option<Queue<T>> {
        self.registry.get(key).map(|entry| entry.value().clone())
    }

    fn lookup(&self, key: &K) -> Result<Queue<T>> {
        self.get(key).ok_or(Error::PipeNotFound)
    }

    /// Offers an item to the queue under `key`, waiting while it is full.
    pub fn push(&self, key: &K, item: T) -> Result<()> {
        self.lookup(key)?.offer(item).map_err(Error::from)
    }

    /// Offers every item of `stream` to the queue under `key`.
    pub async fn publish_to<S>(&self, key: &K, stream: S) -> Result<()>
    where
        S: Stream<Item = T>,
    {
        let queue = self.lookup(key)?;
        queue.from_stream(stream).await.map_err(Error::from)
    }

    /// Closes the queue under `key`. Returns `false` if no queue is registered or it was closed.
    pub fn close(&self, key: &K) -> bool {
        match self.get(key) {
            Some(queue) => queue.close(),
            None => false,
        }
    }

    pub fn close_all(&self) {
        let queues: Vec<_> = self.registry.iter().map(|entry| entry.value().clone()).collect();
        queues.iter().for_each(|queue| {
            queue.close();
        });
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl<K, T> Pipes<K, T>
where
    K: Hash + Eq,
    T: 'static + Send,
{
    /// Returns a stream over the queue under `key`.
    pub fn stream(&self, key: &K) -> Option<QueueStream<T>> {
        self.get(key).map(|queue| queue.stream())
    }

    /// Returns a pipeline built by `react` over the queue under `key`.
    pub fn future_stream(&self, key: &K, react: &LazyReact) -> Option<FutureStream<T>> {
        self.get(key).map(|queue| react.from_adapter(&queue))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;

    #[test]
    fn registry_operations() {
        let pipes = Pipes::new();
        assert!(pipes.is_empty());
        assert!(pipes.register("a", Queue::bounded(4)).is_none());
        assert!(pipes.register("b", Queue::unbounded()).is_none());
        assert_eq!(pipes.len(), 2);

        pipes.push(&"a", 1).unwrap();
        assert!(matches!(pipes.push(&"c", 1), Err(Error::PipeNotFound)));

        let removed = pipes.deregister(&"b").unwrap();
        assert!(!removed.is_closed());
        assert!(pipes.get(&"b").is_none());
        assert!(!pipes.close(&"b"));

        pipes.close_all();
        assert!(pipes.get(&"a").unwrap().is_closed());
        assert!(matches!(pipes.push(&"a", 2), Err(Error::QueueClosed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keyed_pipelines() {
        let react = LazyReact::new(Executor::current().unwrap());
        let pipes = Pipes::new();
        pipes.register(1u8, Queue::bounded(2));
        pipes.register(2u8, Queue::unbounded());

        let doubled = pipes.future_stream(&1, &react).unwrap().map(|value| value * 2);
        let mut raw = pipes.stream(&2).unwrap();

        let producer = {
            let pipes = pipes.clone();
            tokio::spawn(async move {
                pipes.publish_to(&1, stream::iter(0..10)).await.unwrap();
                pipes.push(&2, 99).unwrap();
                pipes.close_all();
            })
        };

        let values = doubled.to_vec().await.unwrap();
        producer.await.unwrap();
        itertools::assert_equal(values, (0..10).map(|value| value * 2));
        assert_eq!(raw.next().await, Some(99));
        assert_eq!(raw.next().await, None);
    }
}
