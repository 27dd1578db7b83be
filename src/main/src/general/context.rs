//! Deadline + cancellation carried into every node fetch.

use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoneReason {
    Canceled,
    DeadlineExceeded,
}

#[derive(Clone, Debug)]
pub struct ScrapeContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl ScrapeContext {
    /// No deadline, never canceled unless [`ScrapeContext::cancel`] is called.
    #[cfg(test)]
    pub fn background() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Root context that ends when `token` is canceled, e.g. on shutdown.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            deadline: None,
            token,
        }
    }

    /// Child context ending after `timeout`, or earlier with the parent.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context. Keeps the parent's deadline when it is tighter, and is
    /// canceled together with the parent.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why the context is already done, `None` while it is still live.
    pub fn err(&self) -> Option<DoneReason> {
        if self.token.is_cancelled() {
            return Some(DoneReason::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(DoneReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => DoneReason::Canceled,
                    _ = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                DoneReason::Canceled
            }
        }
    }

    /// Drives `fut` until it finishes or the context is done, whichever is first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, DoneReason> {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            reason = self.done() => Err(reason),
        }
    }
}
