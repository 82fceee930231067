//! Bounded task groups sharing one cancellation token.
//!
//! A [`TaskScope`] spawns futures onto the runtime, limits how many run at
//! once, and cancels its token as soon as one of them fails. Tasks that have
//! not started when the token fires resolve to [`FulfilmentError::Cancelled`];
//! tasks already running observe the token cooperatively.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{root_cause, FulfilmentError, FulfilmentResult};

/// A set of fallible tasks with fail-fast cancellation.
pub struct TaskScope<T> {
    tasks: JoinSet<FulfilmentResult<T>>,
    token: CancellationToken,
    permits: Arc<Semaphore>,
}

impl<T: Send + 'static> TaskScope<T> {
    /// Create a scope allowing `max_concurrent` tasks at once (minimum 1).
    pub fn new(token: CancellationToken, max_concurrent: usize) -> Self {
        Self::with_permits(token, Arc::new(Semaphore::new(max_concurrent.max(1))))
    }

    /// Create a scope drawing from a semaphore shared with other scopes.
    pub fn with_permits(token: CancellationToken, permits: Arc<Semaphore>) -> Self {
        Self {
            tasks: JoinSet::new(),
            token,
            permits,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a task into the scope.
    ///
    /// The task waits for a permit, then runs unless the token has fired. A
    /// non-cancellation error cancels the token for every sibling.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = FulfilmentResult<T>> + Send + 'static,
    {
        let token = self.token.clone();
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(FulfilmentError::Cancelled),
                permit = permits.acquire_owned() => {
                    permit.map_err(|_| FulfilmentError::Cancelled)?
                }
            };
            if token.is_cancelled() {
                return Err(FulfilmentError::Cancelled);
            }

            let result = task.await;
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    debug!(error = %e, "Task failed, cancelling siblings");
                    token.cancel();
                }
            }
            result
        });
    }

    /// Wait for every task.
    ///
    /// Returns the outputs in completion order, or the root-cause error when
    /// any task failed. Every task is awaited either way, so in-flight work
    /// finishes before this returns.
    pub async fn join_all(mut self) -> FulfilmentResult<Vec<T>> {
        let mut outputs = Vec::with_capacity(self.tasks.len());
        let mut errors = Vec::new();

        while let Some(joined) = self.tasks.join_next().await {
            match joined.map_err(FulfilmentError::from).and_then(|r| r) {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    self.token.cancel();
                    errors.push(e);
                }
            }
        }

        match root_cause(errors) {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }
}
