use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Duration, Instant};
use parking_lot::Mutex;

/// Throttles calls to the financial-data provider.
///
/// Every sync worker and every phase of a user pipeline goes through the same
/// limiter, so the provider sees at most `max_concurrent` requests in flight
/// and at most `requests_per_minute` request starts per minute.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    last_request: Mutex<Option<Instant>>,
    min_delay: Duration,
}

impl RateLimiter {
    /// `max_concurrent` and `requests_per_minute` of 0 are treated as 1.
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_delay_ms = 60_000 / requests_per_minute.max(1) as u64;
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            last_request: Mutex::new(None),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Waits for a free slot and for the minimum spacing since the previous
    /// request. The slot is held until the guard is dropped.
    pub async fn acquire(&self) -> Result<RateLimitGuard, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;

        // Reserve our start time under the lock, sleep outside it.
        let wait = {
            let mut last = self.last_request.lock();
            let now = Instant::now();
            let start = match *last {
                Some(previous) if previous + self.min_delay > now => previous + self.min_delay,
                _ => now,
            };
            *last = Some(start);
            start - now
        };

        if !wait.is_zero() {
            sleep(wait).await;
        }

        Ok(RateLimitGuard { _permit: permit })
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Holds a provider slot; released on drop.
pub struct RateLimitGuard {
    _permit: OwnedSemaphorePermit,
}
