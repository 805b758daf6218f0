//! # Call Context
//!
//! Purpose: Carry cancellation and deadlines into every client call.
//!
//! A `Context` bounds the wait for a pooled connection, the dial and the
//! socket I/O of one call. When it fires mid-I/O the call's connection is
//! discarded rather than returned, since its framing state is unknown.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult};

/// Cancellation token plus optional deadline. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never fires.
    pub fn background() -> Self {
        Context::default()
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Sets a deadline; an earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the error describing why the context is done, if it is.
    pub fn err(&self) -> Option<ClientError> {
        if let Some(token) = &self.token {
            if token.is_cancelled() {
                return Some(ClientError::Cancelled);
            }
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ClientError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ClientError {
        match (&self.token, self.deadline) {
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    _ = token.cancelled() => ClientError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ClientError::DeadlineExceeded,
                }
            }
            (Some(token), None) => {
                token.cancelled().await;
                ClientError::Cancelled
            }
            (None, Some(deadline)) => {
                tokio::time::sleep_until(deadline).await;
                ClientError::DeadlineExceeded
            }
            (None, None) => std::future::pending().await,
        }
    }

    /// Runs `fut` until it completes or the context fires, whichever is first.
    pub async fn run<T, F>(&self, fut: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        if self.token.is_none() && self.deadline.is_none() {
            return fut.await;
        }
        tokio::select! {
            biased;
            result = fut => result,
            err = self.done() => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_fires() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        let value = ctx.run(async { Ok::<_, ClientError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn cancelled_token_reports_cancelled() {
        let token = CancellationToken::new();
        let ctx = Context::background().with_cancellation(token.clone());
        token.cancel();
        assert!(matches!(ctx.err(), Some(ClientError::Cancelled)));
        let result = ctx
            .run(std::future::pending::<ClientResult<()>>())
            .await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_pending_future() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run(std::future::pending::<ClientResult<()>>())
            .await;
        assert!(matches!(result, Err(ClientError::DeadlineExceeded)));
        assert!(matches!(ctx.err(), Some(ClientError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::background()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(5));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
