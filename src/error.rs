use crate::common::*;
use std::any::Any;

/// Boxed failure produced by user-supplied work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type shared by queues, topics, collectors and stream pipelines.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the queue is closed")]
    QueueClosed,
    #[error("the queue is full")]
    QueueFull,
    #[error("no pipe is registered for the key")]
    PipeNotFound,
    #[error("task failed: {0}")]
    Task(#[source] BoxError),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled before completion")]
    Cancelled,
    #[error("no async runtime is available: {0}")]
    NoRuntime(String),
    #[error("failed to start the executor runtime")]
    Runtime(#[from] std::io::Error),
}

impl Error {
    /// Converts a failure returned by user work into an [Error].
    ///
    /// A boxed [Error] is unwrapped instead of being nested in [Error::Task].
    pub fn from_task<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        match error.into().downcast::<Error>() {
            Ok(error) => *error,
            Err(other) => Error::Task(other),
        }
    }

    /// Returns the failure as `E` if it is of that type, looking through [Error::Task].
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Error::Task(inner) => inner.downcast_ref::<E>(),
            other => (other as &dyn Any).downcast_ref::<E>(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::QueueClosed)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_panic() {
            let payload = error.into_panic();
            let message = if let Some(message) = payload.downcast_ref::<&str>() {
                message.to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic payload".to_string()
            };
            Error::Panicked(message)
        } else {
            Error::Cancelled
        }
    }
}

/// The error returned when an item cannot be offered to a queue.
///
/// The rejected item is handed back to the caller.
#[derive(Derivative, thiserror::Error)]
#[derivative(Debug)]
pub enum OfferError<T> {
    #[error("offer to a closed queue")]
    Closed(#[derivative(Debug = "ignore")] T),
    #[error("the queue is full")]
    Full(#[derivative(Debug = "ignore")] T),
}

impl<T> OfferError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(item) | Self::Full(item) => item,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> From<OfferError<T>> for Error {
    fn from(error: OfferError<T>) -> Self {
        match error {
            OfferError::Closed(_) => Error::QueueClosed,
            OfferError::Full(_) => Error::QueueFull,
        }
    }
}

/// The error returned by non-blocking and timed takes on a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TakeError {
    #[error("the queue is empty")]
    Empty,
    #[error("timed out waiting for an item")]
    Timeout,
    #[error("the queue is closed and drained")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("flaky backend")]
    struct Flaky;

    #[test]
    fn from_task_unwraps_crate_errors() {
        let error = Error::from_task(Error::QueueClosed);
        assert!(error.is_closed());

        let error = Error::from_task(Flaky);
        assert!(matches!(error, Error::Task(_)));
        assert!(error.downcast_ref::<Flaky>().is_some());
    }

    #[test]
    fn downcast_ref_sees_crate_variants() {
        let error = Error::Cancelled;
        assert!(matches!(error.downcast_ref::<Error>(), Some(Error::Cancelled)));
        assert!(error.downcast_ref::<Flaky>().is_none());
    }

    #[test]
    fn offer_error_returns_item() {
        let error = OfferError::Closed(7);
        assert!(error.is_closed());
        assert_eq!(error.into_inner(), 7);
        assert!(matches!(Error::from(OfferError::Full(1)), Error::QueueFull));
    }
}
