//! Rolling-window request limiter shared by every unit of work talking to one vendor.
//!
//! Remembers the instant of each issued request. A new request is admitted
//! while fewer than `max_requests` instants fall inside the window; otherwise
//! the caller waits until the oldest one expires. Both waits sleep for the
//! computed duration (thread sleep or tokio timer), never spin.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Window the per-minute budget is measured over.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting `requests_per_minute` requests per rolling 60 s.
    ///
    /// A zero budget is treated as one request per window.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, DEFAULT_WINDOW)
    }

    pub fn with_window(max_requests: u32, window: Duration) -> Self {
        let max_requests = max_requests.max(1) as usize;
        Self {
            max_requests,
            window,
            issued: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Recover from a poisoned lock; a slightly off budget beats a panic.
    fn lock_issued(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.issued.lock().unwrap_or_else(|poisoned| {
            warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Admit a request now, or report how long until the oldest one expires.
    fn reserve(&self) -> Result<(), Duration> {
        let mut issued = self.lock_issued();
        let now = Instant::now();
        while let Some(&oldest) = issued.front() {
            if now.duration_since(oldest) >= self.window {
                issued.pop_front();
            } else {
                break;
            }
        }

        if issued.len() < self.max_requests {
            issued.push_back(now);
            return Ok(());
        }

        match issued.front() {
            Some(&oldest) => Err(self.window.saturating_sub(now.duration_since(oldest))),
            None => Ok(()),
        }
    }

    /// Admit a request if the budget allows it, without waiting.
    pub fn try_acquire(&self) -> bool {
        self.reserve().is_ok()
    }

    /// Block the current thread until a request may be issued.
    pub fn acquire(&self) {
        while let Err(wait) = self.reserve() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, blocking");
            std::thread::sleep(wait);
        }
    }

    /// Suspend the current task until a request may be issued.
    pub async fn acquire_async(&self) {
        while let Err(wait) = self.reserve() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted against the window.
    pub fn in_window(&self) -> usize {
        let issued = self.lock_issued();
        let now = Instant::now();
        issued
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_budget_then_refuses() {
        let limiter = RateLimiter::per_minute(3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.in_window(), 3);
    }

    #[test]
    fn zero_budget_still_admits_one() {
        let limiter = RateLimiter::per_minute(0);
        assert_eq!(limiter.max_requests(), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn blocking_acquire_waits_for_oldest_to_expire() {
        let window = Duration::from_millis(150);
        let limiter = RateLimiter::with_window(2, window);
        let before_first = Instant::now();

        limiter.acquire();
        limiter.acquire();
        limiter.acquire(); // third must wait for the first to age out

        assert!(before_first.elapsed() >= window);
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(20));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn async_acquire_waits_for_oldest_to_expire() {
        let window = Duration::from_millis(120);
        let limiter = RateLimiter::with_window(3, window);
        let before_first = Instant::now();

        for _ in 0..3 {
            limiter.acquire_async().await;
        }
        assert!(before_first.elapsed() < window);

        limiter.acquire_async().await;
        assert!(before_first.elapsed() >= window);
    }
}
