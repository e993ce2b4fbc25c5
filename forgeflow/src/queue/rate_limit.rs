//! Queue-wide dequeue rate limiting.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window rate limiter for job dispatch.
///
/// Throttles dequeues independent of priority: at most `per_minute`
/// permits are granted in any 60 second window. Waiting happens outside
/// the lock so concurrent workers never block each other's bookkeeping.
#[derive(Debug)]
pub struct DequeueRateLimiter {
    per_minute: u32,
    grants: Mutex<VecDeque<Instant>>,
}

impl DequeueRateLimiter {
    /// Creates a limiter granting `per_minute` permits per minute (min 1).
    #[must_use]
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute: per_minute.max(1),
            grants: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a dispatch permit is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut grants = self.grants.lock();
                let now = Instant::now();

                while grants
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= WINDOW)
                {
                    grants.pop_front();
                }

                if grants.len() < self.per_minute as usize {
                    grants.push_back(now);
                    return;
                }

                // Oldest grant leaving the window frees the next permit.
                grants
                    .front()
                    .map_or(WINDOW, |&t| WINDOW.saturating_sub(now.duration_since(t)))
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Returns the most recently consumed permit.
    ///
    /// Used when a granted dispatch finds nothing to activate (another
    /// worker won the race): the permit goes back so the configured rate
    /// is not under-delivered.
    pub fn release(&self) {
        self.grants.lock().pop_back();
    }

    /// Permits currently consumed within the window.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.grants
            .lock()
            .iter()
            .filter(|&&t| now.duration_since(t) < WINDOW)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_grants_up_to_rate_immediately() {
        let limiter = DequeueRateLimiter::new(5);

        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_flight(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_acquire_waits_for_window() {
        let limiter = DequeueRateLimiter::new(5);
        for _ in 0..5 {
            limiter.acquire().await;
        }

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_secs(59), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = DequeueRateLimiter::new(2);
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        limiter.acquire().await;

        // First grant expires at t=60; a third acquire should wait ~30s.
        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(waited >= Duration::from_secs(29), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(31), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_permit_is_granted_again_immediately() {
        let limiter = DequeueRateLimiter::new(5);
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.in_flight(), 5);

        limiter.release();
        assert_eq!(limiter.in_flight(), 4);

        // No window wait: the freed permit is available right away.
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_rate_floor_is_one() {
        let limiter = DequeueRateLimiter::new(0);
        assert_eq!(limiter.per_minute, 1);
    }
}
