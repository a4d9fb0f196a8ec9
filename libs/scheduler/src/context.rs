//! Cancellation and deadline context passed to scheduler operations.
//!
//! A [`Context`] is cheap to clone. Deriving a child (with [`Context::child`]
//! or one of the deadline helpers) links its cancellation to the parent:
//! cancelling the parent cancels every child, but not the other way round.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};

/// Cancellation/deadline-bearing context for a single operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<String>,
}

impl Context {
    /// Create a background context that is only done once cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing cancellation token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            request_id: None,
        }
    }

    /// Derive a child context sharing this context's deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            request_id: self.request_id.clone(),
        }
    }

    /// Derive a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child context that expires at `deadline`, or at the parent's
    /// deadline if that is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        });
        child
    }

    /// Attach a request ID used to attribute log lines.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Request ID attached to this context, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Deadline of this context, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Returns the reason the context is done, or `None` while it is live.
    pub fn err(&self) -> Option<SchedulerError> {
        if self.token.is_cancelled() {
            return Some(SchedulerError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(SchedulerError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns an error if the context is done.
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Returns the cancellation-kind error describing why.
    pub async fn done(&self) -> SchedulerError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => SchedulerError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => SchedulerError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                SchedulerError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_context_is_live() {
        let ctx = Context::new();
        assert!(!ctx.is_done());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children_only() {
        let parent = Context::new();
        let child = parent.child();
        let other = child.child();

        other.cancel();
        assert!(other.is_done());
        assert!(!child.is_done());

        parent.cancel();
        assert_eq!(child.err(), Some(SchedulerError::Cancelled));
        assert_eq!(child.done().await, SchedulerError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::new().with_timeout(Duration::from_secs(5));
        assert!(!ctx.is_done());

        let err = ctx.done().await;
        assert_eq!(err, SchedulerError::DeadlineExceeded);
        assert!(err.is_cancellation());
        assert_eq!(ctx.check(), Err(SchedulerError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_keeps_earlier_deadline() {
        let parent = Context::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_request_id() {
        let ctx = Context::new().with_request_id("req_1");
        assert_eq!(ctx.child().request_id(), Some("req_1"));
    }
}
