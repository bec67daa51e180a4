//! Queue error types.

use thiserror::Error;

/// Result type for queue mutations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors raised by [`crate::queue::ModeAwareQueue`].
///
/// Domain data never produces an error anywhere in this crate; the only
/// failure is a caller mutating a queue after closing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A mutator was called after `close()`.
    #[error("cannot {operation} on a closed queue")]
    Closed { operation: &'static str },
}

impl QueueError {
    pub(crate) fn closed(operation: &'static str) -> Self {
        Self::Closed { operation }
    }
}
