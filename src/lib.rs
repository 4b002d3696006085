//! Lazy asynchronous task streams with bounded concurrency.
//!
//! A [LazyReact] builder carries an [Executor], a [RetryPolicy], the
//! [MaxActive] admission thresholds and execution flags. It builds
//! [FutureStream] pipelines whose per-element work is recorded lazily and
//! submitted to the executor when a terminal operation pulls the element.
//!
//! The extension traits can be imported from [`prelude`](prelude).
//!
//! ```rust
//! use lazy_react::prelude::*;
//! ```
//!
//! # Pipelines
//!
//! - Sources: [`react.of(values)`](LazyReact::of), [`from_iter()`](LazyReact::from_iter),
//!   [`from_stream()`](LazyReact::from_stream), [`from_suppliers()`](LazyReact::from_suppliers),
//!   [`from_futures()`](LazyReact::from_futures), [`from_adapter()`](LazyReact::from_adapter),
//!   [`iterate()`](LazyReact::iterate), [`generate()`](LazyReact::generate) and
//!   [`generate_async()`](LazyReact::generate_async).
//! - Element stages: [`map()`](FutureStream::map), [`try_map()`](FutureStream::try_map),
//!   [`filter()`](FutureStream::filter), [`then()`](FutureStream::then),
//!   [`retry()`](FutureStream::retry), [`recover()`](FutureStream::recover) and friends.
//! - Re-synchronizing stages: [`flat_map()`](FutureStream::flat_map),
//!   [`grouped()`](FutureStream::grouped), [`merge()`](FutureStream::merge).
//! - Terminals: [`to_vec()`](FutureStream::to_vec), [`block()`](FutureStream::block),
//!   [`for_each()`](FutureStream::for_each), [`run()`](FutureStream::run),
//!   [`into_stream()`](FutureStream::into_stream) and
//!   [`into_ordered_stream()`](FutureStream::into_ordered_stream).
//!
//! ```rust
//! use lazy_react::prelude::*;
//!
//! let react = LazyReact::parallel_builder(4).unwrap().with_max_active((8, 4));
//! let total: i64 = react
//!     .range(0, 100)
//!     .map(|value| value * 2)
//!     .filter(|value| value % 3 == 0)
//!     .block()
//!     .unwrap()
//!     .into_iter()
//!     .sum();
//! assert_eq!(total, (0..100).map(|v| v * 2).filter(|v| v % 3 == 0).sum::<i64>());
//! ```
//!
//! # Admission Control
//!
//! The terminal operations keep at most [`ceiling`](MaxActive::ceiling) elements
//! in flight. Once exceeded, completed elements are drained until no more than
//! [`reduce_to`](MaxActive::reduce_to) remain. The `max_active` parameters
//! accept the following values.
//!
//! - `None`: the [IO](MaxActive::IO) preset, ceiling 100 draining to 90.
//! - `10` or non-zero integers: ceiling 10, draining to 90% of it.
//! - `2.5` or positive floating points: ceiling of 2.5 times the system processors.
//! - `(10, 5)`: ceiling 10, draining to 5.
//!
//! # Queues and Topics
//!
//! A [Queue] bridges push-based producers and pull-based consumers with
//! backpressure. A [Topic] hands a copy of every item to each subscriber.
//! Both implement [Adapter] and can feed a pipeline through
//! [`from_adapter()`](LazyReact::from_adapter).
//!
//! ```rust
//! # lazy_react::Executor::new(2).unwrap().block_on(async {
//! use futures::prelude::*;
//! use lazy_react::Queue;
//!
//! let queue = Queue::bounded(2);
//! let producer = {
//!     let queue = queue.clone();
//!     tokio::spawn(async move {
//!         queue.from_stream(stream::iter(0..10)).await.unwrap();
//!         queue.close();
//!     })
//! };
//! let received: Vec<_> = queue.stream().collect().await;
//! producer.await.unwrap();
//! assert_eq!(received, (0..10).collect::<Vec<_>>());
//! # })
//! ```

/// Commonly used traits and types.
pub mod prelude {
    pub use super::{
        adapter::Adapter, future_stream::FutureStreamExt, index_stream::IndexStreamExt,
        FutureStream, LazyReact,
    };
}

mod adapter;
mod collector;
mod common;
mod config;
mod error;
mod executor;
mod future_stream;
mod index_stream;
mod memoize;
mod pipes;
mod pool;
mod queue;
mod react;
pub mod rt;
mod retry;
mod task;
mod topic;
mod utils;
mod wait;

pub use adapter::*;
pub use collector::*;
pub use config::*;
pub use error::*;
pub use executor::*;
pub use future_stream::*;
pub use index_stream::*;
pub use memoize::*;
pub use pipes::*;
pub use queue::*;
pub use react::*;
pub use retry::*;
pub use topic::*;
pub use wait::*;
