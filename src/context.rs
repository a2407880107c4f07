//! Per-attempt cancellation, deadlines and call options.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`DialContext`] stopped an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// Cancellation scope for a single connection attempt.
///
/// Cloning shares the cancellation token; cancelling any clone aborts every
/// operation running under it.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl DialContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context cancelled together with `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Derive a context that expires `timeout` from now. An earlier
    /// existing deadline is kept.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`. An earlier existing
    /// deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Cancel every operation bound to this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reason this context is already done, if it is.
    pub fn err(&self) -> Option<Interrupt> {
        if self.token.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Interrupt::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Drive `fut` until it completes or the context is done.
    ///
    /// On interruption `fut` is dropped, which closes any socket it owns.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        if let Some(reason) = self.err() {
            return Err(reason);
        }

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupt::Cancelled),
            _ = deadline => Err(Interrupt::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// Per-call overrides read during one dial/upgrade and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// User agent handed to the proxy dialer instead of the session default.
    pub user_agent: Option<String>,
    /// Restrict ALPN to `http/1.1`.
    pub force_http1: bool,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn force_http1(mut self, force: bool) -> Self {
        self.force_http1 = force;
        self
    }
}
