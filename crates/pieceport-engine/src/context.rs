//! Per-run execution context: cancellation, logging and store-call bounds.

use std::time::Duration;

use pieceport_store::StoreError;
use tokio_util::sync::CancellationToken;
use tracing::Dispatch;

use crate::errors::MigrationError;

/// Everything a worker needs besides the stores themselves.
///
/// The `dispatch` is the structured logger for the run. It is installed
/// on every task and blocking-pool thread the run uses, so callers (and
/// tests) decide where output goes without touching a global logger.
#[derive(Clone)]
pub struct MigrationContext {
    cancel: CancellationToken,
    dispatch: Dispatch,
    query_timeout: Option<Duration>,
}

impl MigrationContext {
    /// Build a context around `cancel`, logging to the caller's current
    /// default subscriber.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
            query_timeout: None,
        }
    }

    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Bound every point query (gate check, flag, metadata, deal
    /// listing and deal writes). Streaming index reads/writes are not
    /// bounded.
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context whose token is cancelled with this one but can also be
    /// cancelled on its own (used to stop a fail-fast run).
    #[must_use]
    pub(crate) fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            dispatch: self.dispatch.clone(),
            query_timeout: self.query_timeout,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `call` on the blocking pool under this run's logger.
    ///
    /// A cancelled context refuses to start the call. Once started, the
    /// call is always awaited, so nothing a run dispatched is still
    /// touching a store after the run returns. Long calls watch the token
    /// themselves (see the index record producer).
    pub(crate) async fn blocking<T, F>(&self, call: F) -> Result<T, MigrationError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }
        let dispatch = self.dispatch.clone();
        tokio::task::spawn_blocking(move || tracing::dispatcher::with_default(&dispatch, call))
            .await
            .map_err(|e| {
                MigrationError::Infrastructure(anyhow::anyhow!("store task panicked: {e}"))
            })
    }

    /// Like [`blocking`](Self::blocking) for a single store query, which
    /// fails with [`StoreError::Timeout`] once the query timeout elapses.
    /// An overrunning call is still awaited before the timeout is
    /// reported.
    ///
    /// The outer `Result` carries run-level interruptions, the inner one
    /// the store's answer.
    pub(crate) async fn query<T, F>(
        &self,
        call: F,
    ) -> Result<pieceport_store::Result<T>, MigrationError>
    where
        T: Send + 'static,
        F: FnOnce() -> pieceport_store::Result<T> + Send + 'static,
    {
        let Some(timeout) = self.query_timeout else {
            return self.blocking(call).await;
        };
        let call = self.blocking(call);
        tokio::pin!(call);
        match tokio::time::timeout(timeout, &mut call).await {
            Ok(result) => result,
            Err(_) => {
                let late = call.await;
                tracing::warn!(
                    timeout_ms = timeout.as_millis(),
                    completed = matches!(late, Ok(Ok(_))),
                    "Store query overran its timeout"
                );
                Ok(Err(StoreError::Timeout(timeout)))
            }
        }
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn blocking_returns_value() {
        let ctx = MigrationContext::new(CancellationToken::new());
        assert_eq!(ctx.blocking(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_context_refuses_work() {
        let ctx = MigrationContext::new(CancellationToken::new());
        ctx.cancel();
        let err = ctx.blocking(|| 1).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_waits_for_the_running_call() {
        let ctx = MigrationContext::new(CancellationToken::new());
        let worker_ctx = ctx.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let task = tokio::spawn(async move {
            worker_ctx
                .blocking(move || {
                    std::thread::sleep(Duration::from_millis(200));
                    flag.store(true, Ordering::SeqCst);
                    7
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        assert_eq!(task.await.unwrap().unwrap(), 7);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn query_times_out() {
        let ctx = MigrationContext::new(CancellationToken::new())
            .with_query_timeout(Some(Duration::from_millis(20)));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let result = ctx
            .query(move || {
                std::thread::sleep(Duration::from_millis(300));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        assert!(matches!(result, Err(StoreError::Timeout(_))));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent_running() {
        let parent = MigrationContext::new(CancellationToken::new());
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
