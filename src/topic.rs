use crate::{
    common::*,
    error::{Error, Result},
    queue::{Queue, QueueBuilder, QueueIter, QueueStream},
};
use parking_lot::Mutex;

/// Identifies a [Subscriber] within its [Topic].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(usize);

/// Distributes every offered item to every subscriber.
///
/// Each subscriber owns a [Queue] and receives the items in offer order.
/// A new topic starts with one unclaimed queue that buffers items until the
/// first subscriber claims it. Later subscribers receive items offered after
/// they subscribe.
///
/// ```rust
/// # lazy_react::Executor::new(2).unwrap().block_on(async {
/// use futures::prelude::*;
/// use lazy_react::Topic;
///
/// let topic = Topic::new();
/// let first = topic.subscribe();
/// topic.offer("x").unwrap();
/// let second = topic.subscribe();
/// topic.offer("y").unwrap();
/// topic.close();
///
/// assert_eq!(first.collect::<Vec<_>>().await, ["x", "y"]);
/// assert_eq!(second.collect::<Vec<_>>().await, ["y"]);
/// # })
/// ```
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

struct TopicInner<T> {
    template: QueueBuilder,
    registry: Mutex<Registry<T>>,
}

struct Registry<T> {
    unclaimed: Option<Queue<T>>,
    subscribers: Vec<(SubscriberId, Queue<T>)>,
    targets: Arc<Vec<Queue<T>>>,
    closed: bool,
    next_id: usize,
}

impl<T> Registry<T> {
    fn refresh_targets(&mut self) {
        let targets: Vec<_> = self
            .unclaimed
            .iter()
            .chain(self.subscribers.iter().map(|(_, queue)| queue))
            .cloned()
            .collect();
        self.targets = Arc::new(targets);
    }

    /// Deregisters subscribers whose queues were closed by their consumers.
    fn prune(&mut self) {
        if self.closed {
            return;
        }
        let before = self.subscribers.len();
        self.subscribers.retain(|(_, queue)| !queue.is_closed());
        if self.subscribers.len() != before {
            trace!(pruned = before - self.subscribers.len(), "dropped subscribers removed");
            self.refresh_targets();
        }
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("Topic")
            .field("subscribers", &registry.subscribers.len())
            .field("unclaimed", &registry.unclaimed.is_some())
            .field("closed", &registry.closed)
            .finish()
    }
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Topic<T> {
    /// Creates a topic whose subscriber queues are unbounded.
    pub fn new() -> Self {
        Self::with_builder(QueueBuilder::default())
    }

    /// Creates a topic whose subscriber queues are built from `template`.
    pub fn with_builder(template: QueueBuilder) -> Self {
        let initial = template.build();
        Self::from_parts(template, initial)
    }

    /// Creates a topic that hands `queue` to its first subscriber.
    ///
    /// Later subscriber queues copy the capacity of `queue`.
    pub fn with_queue(queue: Queue<T>) -> Self {
        let template = QueueBuilder::default().capacity(queue.capacity());
        Self::from_parts(template, queue)
    }

    fn from_parts(template: QueueBuilder, initial: Queue<T>) -> Self {
        let mut registry = Registry {
            unclaimed: Some(initial),
            subscribers: vec![],
            targets: Arc::new(vec![]),
            closed: false,
            next_id: 0,
        };
        registry.refresh_targets();

        Self {
            inner: Arc::new(TopicInner {
                template,
                registry: Mutex::new(registry),
            }),
        }
    }

    /// Removes the subscriber from distribution and closes its queue.
    ///
    /// The subscriber still drains the items it already received. Returns
    /// `false` if the subscriber is not registered.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut registry = self.inner.registry.lock();
            let index = match registry.subscribers.iter().position(|(sid, _)| *sid == id) {
                Some(index) => index,
                None => return false,
            };
            let (_, queue) = registry.subscribers.remove(index);
            registry.refresh_targets();
            queue
        };
        removed.close();
        debug!(?id, "subscriber disconnected");
        true
    }

    /// Closes the topic and every registered queue.
    ///
    /// Returns `false` if the topic was already closed.
    pub fn close(&self) -> bool {
        let targets = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return false;
            }
            registry.closed = true;
            registry.targets.clone()
        };
        targets.iter().for_each(|queue| {
            queue.close();
        });
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        let mut registry = self.inner.registry.lock();
        registry.prune();
        registry.subscribers.len()
    }

    fn snapshot(&self) -> Result<Arc<Vec<Queue<T>>>> {
        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return Err(Error::QueueClosed);
        }
        registry.prune();
        Ok(registry.targets.clone())
    }
}

impl<T> Topic<T>
where
    T: 'static + Send,
{
    /// Registers a new subscriber.
    ///
    /// The first subscriber claims the queue that has buffered items since the
    /// topic was created. Subscribing to a closed topic yields a subscriber
    /// whose stream is already finished.
    pub fn subscribe(&self) -> Subscriber<T> {
        let mut registry = self.inner.registry.lock();
        registry.prune();
        let id = SubscriberId(registry.next_id);
        registry.next_id += 1;

        let queue = match registry.unclaimed.take() {
            Some(queue) => queue,
            None => {
                let queue = self.inner.template.build();
                if registry.closed {
                    queue.close();
                }
                queue
            }
        };
        registry.subscribers.push((id, queue.clone()));
        registry.refresh_targets();

        Subscriber {
            id,
            stream: queue.exclusive_stream(),
            queue,
        }
    }
}

impl<T> Topic<T>
where
    T: Clone,
{
    /// Offers the item to every registered queue, waiting on full queues.
    ///
    /// Queues closed by their consumers are skipped. Fails with
    /// [Error::QueueClosed] if the topic is closed.
    pub fn offer(&self, item: T) -> Result<()> {
        let targets = self.snapshot()?;
        let (last, rest) = match targets.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        rest.iter().for_each(|queue| {
            let _ = queue.offer(item.clone());
        });
        let _ = last.offer(item);
        Ok(())
    }

    /// Offers the item to every registered queue, parking the task on full queues.
    pub async fn offer_async(&self, item: T) -> Result<()> {
        let targets = self.snapshot()?;
        let (last, rest) = match targets.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        for queue in rest {
            let _ = queue.offer_async(item.clone()).await;
        }
        let _ = last.offer_async(item).await;
        Ok(())
    }

    pub fn offer_all<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().try_for_each(|item| self.offer(item))
    }

    /// Offers every item of `stream`, stopping if the topic closes.
    pub async fn from_stream<S>(&self, stream: S) -> Result<()>
    where
        S: Stream<Item = T>,
    {
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            self.offer_async(item).await?;
        }
        Ok(())
    }
}

pub use subscriber::*;

mod subscriber {
    use super::*;

    /// A stream of the items distributed to one subscriber of a [Topic].
    ///
    /// Dropping the subscriber closes its queue. The topic then deregisters
    /// it on the next offer or subscription.
    #[derive(Derivative)]
    #[derivative(Debug)]
    pub struct Subscriber<T> {
        pub(super) id: SubscriberId,
        pub(super) queue: Queue<T>,
        #[derivative(Debug = "ignore")]
        pub(super) stream: QueueStream<T>,
    }

    impl<T> Subscriber<T> {
        pub fn id(&self) -> SubscriberId {
            self.id
        }

        pub fn queue(&self) -> &Queue<T> {
            &self.queue
        }

        /// Returns a blocking iterator over the received items.
        pub fn iter(&self) -> QueueIter<T> {
            self.queue.iter()
        }

        pub fn into_stream(self) -> QueueStream<T> {
            self.stream
        }
    }

    impl<T> Stream for Subscriber<T> {
        type Item = T;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Pin::new(&mut self.stream).poll_next(cx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn late_subscriber_sees_later_items() {
        let topic = Topic::new();
        let a = topic.subscribe();
        topic.offer('x').unwrap();
        let b = topic.subscribe();
        topic.offer('y').unwrap();
        topic.close();

        assert_eq!(a.iter().collect::<Vec<_>>(), ['x', 'y']);
        assert_eq!(b.iter().collect::<Vec<_>>(), ['y']);
        assert!(topic.offer('z').unwrap_err().is_closed());
    }

    #[test]
    fn first_subscriber_claims_buffered_items() {
        let topic = Topic::new();
        topic.offer_all(0..3).unwrap();
        let first = topic.subscribe();
        topic.close();

        itertools::assert_equal(first.iter(), 0..3);
        assert_eq!(topic.subscribe().iter().next(), None);
    }

    #[test]
    fn disconnect_isolates_other_subscribers() {
        let topic = Topic::new();
        let a = topic.subscribe();
        let b = topic.subscribe();
        topic.offer(1).unwrap();

        assert!(topic.disconnect(a.id()));
        assert!(!topic.disconnect(a.id()));
        assert_eq!(topic.subscriber_count(), 1);

        topic.offer(2).unwrap();
        topic.close();

        assert_eq!(a.iter().collect::<Vec<_>>(), [1]);
        assert_eq!(b.iter().collect::<Vec<_>>(), [1, 2]);
    }

    #[test]
    fn dropped_subscriber_does_not_block_producer() {
        let topic = Topic::with_queue(Queue::bounded(1));
        let kept = topic.subscribe();
        let dropped = topic.subscribe();
        drop(dropped);

        let producer = {
            let topic = topic.clone();
            thread::spawn(move || {
                topic.offer_all(0..10).unwrap();
                topic.close();
            })
        };
        let received: Vec<_> = kept.iter().collect();
        producer.join().unwrap();

        itertools::assert_equal(received, 0..10);
    }

    #[test]
    fn dropped_subscribers_are_deregistered() {
        let topic = Topic::new();
        (0..1000).for_each(|_| drop(topic.subscribe()));
        let live = topic.subscribe();
        topic.offer(1).unwrap();

        assert_eq!(topic.subscriber_count(), 1);
        assert_eq!(topic.inner.registry.lock().targets.len(), 1);

        topic.close();
        assert_eq!(live.iter().collect::<Vec<_>>(), [1]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fan_out_from_stream() {
        let topic = Topic::with_builder(Queue::<usize>::builder().capacity(2));
        let subscribers: Vec<_> = (0..3).map(|_| topic.subscribe()).collect();

        let producer = {
            let topic = topic.clone();
            tokio::spawn(async move {
                topic.from_stream(stream::iter(0..50)).await.unwrap();
                topic.close();
            })
        };

        let outputs = future::join_all(
            subscribers
                .into_iter()
                .map(|sub| sub.collect::<Vec<_>>()),
        )
        .await;
        producer.await.unwrap();

        for output in outputs {
            itertools::assert_equal(output, 0..50);
        }
    }
}
