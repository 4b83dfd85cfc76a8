//! Request context: deadline plus cancellation, passed into every store call.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, StoreResult};

/// Deadline and cancellation signal supplied by the HTTP layer.
///
/// Cloning shares the cancellation token; [`RequestContext::child`] derives
/// a context that is canceled with its parent but can also be canceled alone.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// A context with no deadline that is never canceled unless asked to.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Sets an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets a deadline `timeout` from now. A timeout too large to represent
    /// leaves the context without a new deadline.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Uses an existing cancellation token (e.g. the server's shutdown token).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Derives a context that inherits this deadline and cancellation.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancels this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails fast if the context is already canceled or past its deadline.
    ///
    /// # Errors
    ///
    /// Returns `Canceled` or `DeadlineExceeded`.
    pub fn check(&self) -> StoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Canceled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `fut` until it completes or the context ends, whichever is first.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, `Canceled`, or `DeadlineExceeded`.
    pub async fn run<F, T>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Canceled),
            _ = deadline => Err(StoreError::DeadlineExceeded),
            result = fut => result,
        }
    }
}
