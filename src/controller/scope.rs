//! Cancellation and deadline for a single reconcile
//!
//! Every store call made while reconciling goes through [`ReconcileScope::call`],
//! which aborts it when the operator shuts down or the reconcile deadline
//! passes. Both cases surface as retryable errors so an interrupted
//! reconcile is never reported as a success.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Error;

/// Cancellation token and deadline shared by all store calls of one reconcile
#[derive(Clone, Debug)]
pub struct ReconcileScope {
    cancel: CancellationToken,
    deadline: Instant,
}

impl ReconcileScope {
    /// Create a scope cancelled together with `parent` and expiring after `timeout`
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    #[cfg(test)]
    fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a store call, giving up on cancellation or when the deadline passes
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(operation = %operation, "store call cancelled");
                Err(Error::cancelled(operation))
            }
            result = tokio::time::timeout_at(self.deadline, fut) => match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(operation = %operation, "store call exceeded reconcile deadline");
                    Err(Error::timeout(operation))
                }
            },
        }
    }
}
