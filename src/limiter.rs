use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Default number of concurrent outbound deliveries.
pub const DEFAULT_CAPACITY: usize = 5;

/// Bounded admission control for concurrent alert deliveries.
///
/// Permits are RAII guards: dropping one releases the slot on every exit path,
/// including a panicking delivery task.
#[derive(Debug, Clone)]
pub struct DispatchLimiter {
    sem: Arc<Semaphore>,
}

impl DispatchLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Take a slot without waiting, if one is free.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.sem).try_acquire_owned().ok()
    }

    /// Wait for a slot. Returns `None` if the token is cancelled first or the
    /// limiter is closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.sem).acquire_owned() => permit.ok(),
        }
    }

    #[allow(dead_code)]
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

impl Default for DispatchLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_fails_when_saturated() {
        let limiter = DispatchLimiter::new(2);
        let _a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
    }

    #[tokio::test]
    async fn dropping_a_permit_frees_a_slot() {
        let limiter = DispatchLimiter::new(1);
        let a = limiter.try_acquire().unwrap();
        assert_eq!(limiter.available(), 0);
        drop(a);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_release() {
        let limiter = DispatchLimiter::new(1);
        let cancel = CancellationToken::new();
        let held = limiter.try_acquire().unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.is_some() })
        };

        tokio::task::yield_now().await;
        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn cancellation_aborts_a_pending_acquire() {
        let limiter = DispatchLimiter::new(1);
        let cancel = CancellationToken::new();
        let _held = limiter.try_acquire().unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.is_none() })
        };

        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(waiter.await.unwrap());
    }
}
