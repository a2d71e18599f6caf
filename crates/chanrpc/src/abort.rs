//! Cancellation signals.
//!
//! An [`AbortSignal`] is a cloneable one-shot flag with a reason. The engine
//! takes two of them: the soft `signal` only stops new calls, the forced
//! `force_signal` also rejects everything in flight and replaces the reply of
//! any inbound request still being served.
//!
//! # Example
//!
//! ```
//! use chanrpc::AbortSignal;
//!
//! let signal = AbortSignal::new();
//! let observer = signal.clone();
//! signal.abort();
//! assert!(observer.is_aborted());
//! assert_eq!(observer.reason().unwrap().kind.name(), "AbortError");
//! ```

use chanrpc_common::ServiceError;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<ServiceError>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts with the default `AbortError` reason.
    pub fn abort(&self) {
        self.abort_with(ServiceError::abort_error());
    }

    /// Aborts with `reason`. Only the first abort sets the reason.
    pub fn abort_with(&self, reason: ServiceError) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The abort reason, or `None` while not aborted.
    pub fn reason(&self) -> Option<ServiceError> {
        if !self.is_aborted() {
            return None;
        }
        Some(
            self.reason
                .get()
                .cloned()
                .unwrap_or_else(ServiceError::abort_error),
        )
    }

    /// Fails with the abort reason if the signal has fired.
    pub fn throw_if_aborted(&self) -> Result<(), ServiceError> {
        match self.reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Completes with the reason once the signal fires.
    ///
    /// Dropping the returned future deregisters the waiter.
    pub async fn aborted(&self) -> ServiceError {
        self.token.cancelled().await;
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(ServiceError::abort_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = AbortSignal::new();
        assert!(signal.throw_if_aborted().is_ok());

        signal.abort_with(ServiceError::error("shutting down"));
        signal.abort_with(ServiceError::error("second"));

        assert_eq!(signal.reason().unwrap().message, "shutting down");
        assert!(signal.throw_if_aborted().is_err());
    }

    #[tokio::test]
    async fn test_aborted_wakes_waiters() {
        let signal = AbortSignal::new();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.aborted().await }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        signal.abort();

        let reason = waiter.await.unwrap();
        assert_eq!(reason, ServiceError::abort_error());
    }
}
