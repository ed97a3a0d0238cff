//! Cancellation and deadline propagation for retry loops.
//!
//! A [`Context`] carries the caller's patience: an optional deadline and a
//! cancel flag. The retry executor checks it before every attempt and races
//! its backoff waits against it, so a canceled caller never starts another
//! attempt and never sits out a full backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Reason a [`Context`] is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// [`Context::cancel`] was called on this context or an ancestor.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Wakes blocking sleepers. Shared by every context in one tree, since a
/// cancel anywhere may reach a sleeper on any descendant.
#[derive(Default)]
struct Wakeup {
    lock: Mutex<()>,
    cond: Condvar,
}

struct ContextInner {
    token: CancellationToken,
    deadline: Option<Instant>,
    wakeup: Arc<Wakeup>,
}

/// A cloneable cancellation handle with an optional deadline.
///
/// Clones share the same state: canceling one cancels all of them.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    fn build(token: CancellationToken, deadline: Option<Instant>, wakeup: Arc<Wakeup>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                token,
                deadline,
                wakeup,
            }),
        }
    }

    /// A context that is never done unless explicitly canceled.
    pub fn background() -> Self {
        Self::build(CancellationToken::new(), None, Arc::default())
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(CancellationToken::new(), Some(deadline), Arc::default())
    }

    /// Derives a child that expires after `timeout` or when this context is
    /// done, whichever comes first. Canceling the child leaves the parent
    /// untouched.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline() {
            Some(parent) => parent.min(own),
            None => own,
        };
        Self::build(
            self.inner.token.child_token(),
            Some(deadline),
            Arc::clone(&self.inner.wakeup),
        )
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        // Taking the lock orders this notify after any sleeper's check.
        let _guard = self.inner.wakeup.lock.lock();
        self.inner.wakeup.cond.notify_all();
    }

    /// Returns why the context is done, or `None` if it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true once the context is canceled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Blocks the current thread for `duration`, waking early if the
    /// context is canceled or its deadline passes.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let wake_at = Instant::now() + duration;
        let until = match self.inner.deadline {
            Some(deadline) => deadline.min(wake_at),
            None => wake_at,
        };

        let wakeup = &self.inner.wakeup;
        let mut guard = wakeup.lock.lock();
        loop {
            if let Some(err) = self.err() {
                return Err(err);
            }
            if Instant::now() >= wake_at {
                return Ok(());
            }
            wakeup.cond.wait_until(&mut guard, until);
        }
    }
}

#[cfg(feature = "async")]
impl Context {
    /// Resolves once the context is done.
    pub async fn done(&self) -> ContextError {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.inner.token.cancelled() => ContextError::Canceled,
                    _ = tokio::time::sleep_until(deadline.into()) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.inner.token.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Async counterpart of [`Context::sleep`].
    pub async fn sleep_async(&self, duration: Duration) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
