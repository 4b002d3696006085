pub use derivative::Derivative;
pub use futures::{
    future::{self, BoxFuture, FutureExt as _},
    ready,
    stream::{self, BoxStream, Stream, StreamExt as _},
};
pub use pin_project::pin_project;
pub use std::{
    collections::{HashMap, VecDeque},
    fmt::{self, Debug},
    future::Future,
    hash::Hash,
    iter,
    marker::PhantomData,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::*},
        Arc,
    },
    task::{Context, Poll, Poll::*},
    time::{Duration, Instant},
};
pub use tracing::{debug, trace};
