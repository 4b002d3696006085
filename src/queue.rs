use crate::{
    common::*,
    error::{OfferError, TakeError},
    wait::WaitStrategy,
};
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

/// A thread-safe FIFO queue with optional capacity.
///
/// Producers block, or park their task, while a bounded queue is full.
/// Consumers block while it is empty. Once [closed](Queue::close), offers are
/// rejected and consumers drain the remaining items, then observe the end of
/// the queue without blocking.
///
/// Clones share the same buffer.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    buffer: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    closed: AtomicBool,
    producer_wait: WaitStrategy,
    consumer_wait: WaitStrategy,
    not_empty: Condvar,
    not_full: Condvar,
    readable: Notify,
    writable: Notify,
    size: Option<watch::Sender<usize>>,
}

impl<T> Inner<T> {
    fn is_full(&self, buffer: &VecDeque<T>) -> bool {
        matches!(self.capacity, Some(cap) if buffer.len() >= cap)
    }

    fn push(&self, buffer: &mut VecDeque<T>, item: T) {
        buffer.push_back(item);
        self.publish_len(buffer.len());
        self.not_empty.notify_one();
        self.readable.notify_one();
    }

    fn pop(&self, buffer: &mut VecDeque<T>) -> Option<T> {
        let item = buffer.pop_front()?;
        self.publish_len(buffer.len());
        self.not_full.notify_one();
        self.writable.notify_one();
        Some(item)
    }

    fn publish_len(&self, len: usize) {
        if let Some(size) = &self.size {
            size.send_replace(len);
        }
    }

    /// Releases the lock for one pause of a non-blocking wait strategy.
    fn pause(guard: &mut MutexGuard<'_, VecDeque<T>>, strategy: WaitStrategy, backoff: &Backoff) {
        MutexGuard::unlocked(guard, || strategy.pause(backoff));
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Queue<T> {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::default()
    }

    /// Creates a queue holding at most `capacity` items.
    pub fn bounded(capacity: usize) -> Self {
        QueueBuilder::default().capacity(capacity).build()
    }

    pub fn unbounded() -> Self {
        QueueBuilder::default().build()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buffer.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Acquire)
    }

    /// Returns true if both handles refer to the same queue.
    pub fn same_queue(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribes to the number of buffered items, if the queue was built with a size signal.
    pub fn size_signal(&self) -> Option<watch::Receiver<usize>> {
        self.inner.size.as_ref().map(|size| size.subscribe())
    }

    /// Closes the queue.
    ///
    /// Returns `false` if it was already closed. Every blocked producer and
    /// consumer is woken up.
    pub fn close(&self) -> bool {
        let len = {
            let buffer = self.inner.buffer.lock();
            if self.inner.closed.swap(true, AcqRel) {
                return false;
            }
            buffer.len()
        };
        trace!(len, "queue closed");

        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        self.inner.readable.notify_waiters();
        self.inner.writable.notify_waiters();
        true
    }

    /// Adds an item, waiting per the producer wait strategy while the queue is full.
    pub fn offer(&self, item: T) -> Result<(), OfferError<T>> {
        let inner = &*self.inner;
        let backoff = Backoff::new();
        let mut buffer = inner.buffer.lock();

        loop {
            if self.is_closed() {
                return Err(OfferError::Closed(item));
            }
            if !inner.is_full(&buffer) {
                inner.push(&mut buffer, item);
                return Ok(());
            }
            match inner.producer_wait {
                WaitStrategy::Block => inner.not_full.wait(&mut buffer),
                strategy => Inner::pause(&mut buffer, strategy, &backoff),
            }
        }
    }

    /// Adds an item without waiting.
    pub fn try_offer(&self, item: T) -> Result<(), OfferError<T>> {
        let inner = &*self.inner;
        let mut buffer = inner.buffer.lock();

        if self.is_closed() {
            Err(OfferError::Closed(item))
        } else if inner.is_full(&buffer) {
            Err(OfferError::Full(item))
        } else {
            inner.push(&mut buffer, item);
            Ok(())
        }
    }

    /// Adds an item, waiting at most `timeout` for free capacity.
    pub fn offer_timeout(&self, item: T, timeout: Duration) -> Result<(), OfferError<T>> {
        let inner = &*self.inner;
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        let mut buffer = inner.buffer.lock();

        loop {
            if self.is_closed() {
                return Err(OfferError::Closed(item));
            }
            if !inner.is_full(&buffer) {
                inner.push(&mut buffer, item);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OfferError::Full(item));
            }
            match inner.producer_wait {
                WaitStrategy::Block => {
                    inner.not_full.wait_until(&mut buffer, deadline);
                }
                strategy => Inner::pause(&mut buffer, strategy, &backoff),
            }
        }
    }

    /// Adds an item, parking the current task while the queue is full.
    pub async fn offer_async(&self, item: T) -> Result<(), OfferError<T>> {
        let inner = &*self.inner;

        loop {
            let notified = inner.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut buffer = inner.buffer.lock();
                if self.is_closed() {
                    return Err(OfferError::Closed(item));
                }
                if !inner.is_full(&buffer) {
                    inner.push(&mut buffer, item);
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Offers every item in order, stopping at the first rejection.
    pub fn offer_all<I>(&self, items: I) -> Result<(), OfferError<T>>
    where
        I: IntoIterator<Item = T>,
    {
        items.into_iter().try_for_each(|item| self.offer(item))
    }

    /// Offers every item of `stream` in order, stopping at the first rejection.
    pub async fn from_stream<S>(&self, stream: S) -> Result<(), OfferError<T>>
    where
        S: Stream<Item = T>,
    {
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            self.offer_async(item).await?;
        }
        Ok(())
    }

    /// Removes the head item, waiting per the consumer wait strategy while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn take(&self) -> Option<T> {
        let inner = &*self.inner;
        let backoff = Backoff::new();
        let mut buffer = inner.buffer.lock();

        loop {
            if let Some(item) = inner.pop(&mut buffer) {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }
            match inner.consumer_wait {
                WaitStrategy::Block => inner.not_empty.wait(&mut buffer),
                strategy => Inner::pause(&mut buffer, strategy, &backoff),
            }
        }
    }

    /// Removes the head item without waiting.
    pub fn try_take(&self) -> Result<T, TakeError> {
        let inner = &*self.inner;
        let mut buffer = inner.buffer.lock();

        match inner.pop(&mut buffer) {
            Some(item) => Ok(item),
            None if self.is_closed() => Err(TakeError::Closed),
            None => Err(TakeError::Empty),
        }
    }

    /// Removes the head item, waiting at most `timeout` for one to arrive.
    pub fn poll_timeout(&self, timeout: Duration) -> Result<T, TakeError> {
        let inner = &*self.inner;
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        let mut buffer = inner.buffer.lock();

        loop {
            if let Some(item) = inner.pop(&mut buffer) {
                return Ok(item);
            }
            if self.is_closed() {
                return Err(TakeError::Closed);
            }
            if Instant::now() >= deadline {
                return Err(TakeError::Timeout);
            }
            match inner.consumer_wait {
                WaitStrategy::Block => {
                    inner.not_empty.wait_until(&mut buffer, deadline);
                }
                strategy => Inner::pause(&mut buffer, strategy, &backoff),
            }
        }
    }

    /// Removes the head item, parking the current task while the queue is empty.
    pub async fn take_async(&self) -> Option<T> {
        let inner = &*self.inner;

        loop {
            let notified = inner.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut buffer = inner.buffer.lock();
                if let Some(item) = inner.pop(&mut buffer) {
                    return Some(item);
                }
                if self.is_closed() {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Returns a blocking iterator that ends once the queue is closed and drained.
    pub fn iter(&self) -> QueueIter<T> {
        QueueIter {
            queue: self.clone(),
        }
    }
}

impl<T> Queue<T>
where
    T: 'static + Send,
{
    /// Returns a stream that ends once the queue is closed and drained.
    pub fn stream(&self) -> QueueStream<T> {
        QueueStream::new(self.clone(), false)
    }

    /// Returns a stream that closes the queue when dropped.
    pub(crate) fn exclusive_stream(&self) -> QueueStream<T> {
        QueueStream::new(self.clone(), true)
    }
}

/// Queue configuration shared by factories.
#[derive(Debug, Clone, Default)]
pub struct QueueBuilder {
    capacity: Option<usize>,
    producer_wait: WaitStrategy,
    consumer_wait: WaitStrategy,
    size_signal: bool,
}

impl QueueBuilder {
    /// Sets the capacity. `None` makes the queue unbounded.
    ///
    /// # Panics
    ///
    /// Panics if the capacity is zero.
    pub fn capacity(mut self, capacity: impl Into<Option<usize>>) -> Self {
        let capacity = capacity.into();
        assert!(capacity != Some(0), "queue capacity must be positive");
        self.capacity = capacity;
        self
    }

    pub fn producer_wait(mut self, strategy: WaitStrategy) -> Self {
        self.producer_wait = strategy;
        self
    }

    pub fn consumer_wait(mut self, strategy: WaitStrategy) -> Self {
        self.consumer_wait = strategy;
        self
    }

    /// Publishes the queue length through [Queue::size_signal].
    pub fn size_signal(mut self, enabled: bool) -> Self {
        self.size_signal = enabled;
        self
    }

    pub fn build<T>(&self) -> Queue<T> {
        let size = self.size_signal.then(|| watch::channel(0).0);

        Queue {
            inner: Arc::new(Inner {
                buffer: Mutex::new(VecDeque::new()),
                capacity: self.capacity,
                closed: AtomicBool::new(false),
                producer_wait: self.producer_wait,
                consumer_wait: self.consumer_wait,
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                readable: Notify::new(),
                writable: Notify::new(),
                size,
            }),
        }
    }
}

pub use queue_stream::*;

mod queue_stream {
    use super::*;

    /// A stream consuming a [Queue].
    #[derive(Derivative)]
    #[derivative(Debug)]
    pub struct QueueStream<T> {
        #[derivative(Debug = "ignore")]
        stream: BoxStream<'static, T>,
        close_on_drop: Option<Queue<T>>,
    }

    impl<T> QueueStream<T>
    where
        T: 'static + Send,
    {
        pub(super) fn new(queue: Queue<T>, close_on_drop: bool) -> Self {
            let close_on_drop = close_on_drop.then(|| queue.clone());
            let stream = stream::unfold(queue, |queue| async move {
                let item = queue.take_async().await?;
                Some((item, queue))
            })
            .boxed();

            Self {
                stream,
                close_on_drop,
            }
        }
    }

    impl<T> Stream for QueueStream<T> {
        type Item = T;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.stream.poll_next_unpin(cx)
        }
    }

    impl<T> Drop for QueueStream<T> {
        fn drop(&mut self) {
            if let Some(queue) = self.close_on_drop.take() {
                queue.close();
            }
        }
    }
}

pub use queue_iter::*;

mod queue_iter {
    use super::*;

    /// A blocking iterator consuming a [Queue].
    #[derive(Debug)]
    pub struct QueueIter<T> {
        pub(super) queue: Queue<T>,
    }

    impl<T> Iterator for QueueIter<T> {
        type Item = T;

        fn next(&mut self) -> Option<Self::Item> {
            self.queue.take()
        }
    }
}
