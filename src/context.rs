//! Cooperative cancellation context
//!
//! Every blocking operation in this crate takes a [`Context`] and gives up
//! as soon as it is cancelled or its deadline passes. Contexts are cheap to
//! clone; clones share cancellation state, so cancelling one handle cancels
//! every operation holding a clone.

use crate::error::LimiterError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Shared cancellation state behind every clone of a [`Context`].
struct Shared {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cancellation and deadline handle propagated through blocking calls.
///
/// # Example
///
/// ```rust
/// use blockcache::context::Context;
///
/// let ctx = Context::background();
/// assert!(ctx.err().is_none());
/// ctx.cancel();
/// assert!(ctx.err().is_some());
/// ```
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            deadline: None,
        }
    }

    /// A context that expires at the given instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        let mut ctx = Self::background();
        ctx.deadline = Some(deadline);
        ctx
    }

    /// A context that expires after the given duration.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Derive a context sharing this one's cancellation state but bounded by
    /// the given deadline. If this context already has an earlier deadline,
    /// it is kept.
    pub fn bounded_by(&self, deadline: Instant) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(deadline),
                None => deadline,
            }),
        }
    }

    /// Cancel the context. Idempotent; wakes every pending wait.
    pub fn cancel(&self) {
        if !self.shared.cancelled.swap(true, Ordering::SeqCst) {
            self.shared.notify.notify_waiters();
        }
    }

    /// The deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking probe: the cancellation cause if the context is done,
    /// `None` while it is still live. Explicit cancellation wins over an
    /// expired deadline.
    pub fn err(&self) -> Option<LimiterError> {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return Some(LimiterError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(LimiterError::DeadlineExceeded)
            }
            _ => None,
        }
    }

    /// Checkpoint for long operations: `Err` with the cancellation cause
    /// once the context is done.
    pub fn check(&self) -> Result<(), LimiterError> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait until the context is done and return the cancellation cause.
    pub async fn done(&self) -> LimiterError {
        let mut notified = std::pin::pin!(self.shared.notify.notified());
        loop {
            // Arm the waiter before probing so a cancel between the probe
            // and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(err) = self.err() {
                return err;
            }
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = notified.as_mut() => {}
                        () = tokio::time::sleep_until(deadline.into()) => {}
                    }
                }
                None => notified.as_mut().await,
            }
            notified.set(self.shared.notify.notified());
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.shared.cancelled.load(Ordering::SeqCst))
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_is_sticky_and_shared() {
        let ctx = Context::background();
        let clone = ctx.clone();
        ctx.cancel();
        ctx.cancel();
        assert!(matches!(clone.err(), Some(LimiterError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline_reports_deadline_exceeded() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(matches!(ctx.err(), Some(LimiterError::DeadlineExceeded)));
    }

    #[test]
    fn test_cancellation_wins_over_deadline() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_secs(1));
        ctx.cancel();
        assert!(matches!(ctx.err(), Some(LimiterError::Cancelled)));
    }

    #[test]
    fn test_bounded_by_keeps_earlier_deadline() {
        let near = Instant::now() + Duration::from_secs(1);
        let far = Instant::now() + Duration::from_secs(60);
        let ctx = Context::with_deadline(near);
        assert_eq!(ctx.bounded_by(far).deadline(), Some(near));
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let ctx = Context::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });
        tokio::task::yield_now().await;
        ctx.cancel();
        let err = handle.await.unwrap();
        assert!(matches!(err, LimiterError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_resolves_on_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        let err = ctx.done().await;
        assert!(matches!(err, LimiterError::DeadlineExceeded));
    }
}
