//! Concurrency cap for backend code-generation calls
//!
//! A window boundary makes every visible entry want to regenerate at the
//! same instant; this limiter bounds how many calls are actually in flight
//! against the secret-holding backend. Waiters queue in FIFO order and the
//! freed slot goes to the longest-waiting caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Bounds simultaneous outstanding backend calls.
///
/// Cheap to clone; clones share the same slot pool.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    max_observed: Arc<AtomicUsize>,
    limit: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `limit` concurrent calls.
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_observed: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    /// Acquire a slot, waiting in FIFO order if none is free.
    ///
    /// The returned [`Slot`] releases on drop, so release is reachable
    /// from every exit path of the guarded call.
    pub async fn acquire(&self) -> Result<Slot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::RuntimeStopped("limiter closed".to_string()))?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(current, Ordering::SeqCst);
        debug!("Slot acquired, {current}/{} in flight", self.limit);

        Ok(Slot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Configured maximum.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest concurrent occupancy ever observed.
    pub fn max_observed(&self) -> usize {
        self.max_observed.load(Ordering::SeqCst)
    }
}

/// RAII slot guard; dropping it hands the slot to the longest-waiting
/// queued caller.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug!("Slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_grants_up_to_limit_immediately() {
        let limiter = ConcurrencyLimiter::new(3);

        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        let c = limiter.acquire().await.unwrap();

        assert_eq!(limiter.in_flight(), 3);
        drop((a, b, c));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit_under_burst() {
        let limiter = ConcurrencyLimiter::new(5);

        let mut handles = Vec::new();
        for _ in 0..12 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move {
                let slot = l.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(slot);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(limiter.max_observed() <= 5);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_slot_released_on_error_path() {
        let limiter = ConcurrencyLimiter::new(1);

        let failing = async {
            let _slot = limiter.acquire().await?;
            Err::<(), _>(Error::Other("backend rejected".to_string()))
        };
        assert!(failing.await.is_err());

        // The slot freed despite the error; the next acquire succeeds
        // without waiting.
        let slot = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);
        drop(slot);
    }

    #[tokio::test]
    async fn test_freed_slot_wakes_waiter() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let l = limiter.clone();
        let waiter = tokio::spawn(async move {
            let _slot = l.acquire().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }
}
