//! # Rate Limiter & Execution Budget
//!
//! In-memory guards for one run. Both read `tokio::time::Instant`, so tests
//! drive them with a paused clock.
//!
//! ## Rate Limit Window
//! ```text
//!   window start                                   +60s
//!   │ call 1 │ call 2 │ ... │ call N (= ceiling) │ wait ──►│ counter reset
//!   │◄─ ≥ min spacing ─►│                                  │ call N+1
//! ```
//!
//! ## Budget
//! ```text
//!   start ─────────────── max − margin ───────── max
//!   │  new work allowed   │ exhausted: finish     │ lock expires
//!   │                     │ in-flight work only   │
//! ```

use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

const WINDOW: Duration = Duration::from_secs(60);

/// Bounds outbound calls per rolling one-minute window.
#[derive(Debug)]
pub struct RateLimiter {
    per_minute: u32,
    min_spacing: Duration,
    window_start: Instant,
    calls_in_window: u32,
    last_call: Option<Instant>,
    total_calls: u64,
}

impl RateLimiter {
    pub fn new(per_minute: u32, min_spacing: Duration) -> Self {
        RateLimiter {
            per_minute: per_minute.max(1),
            min_spacing,
            window_start: Instant::now(),
            calls_in_window: 0,
            last_call: None,
            total_calls: 0,
        }
    }

    /// Waits until another call is permitted, then counts it.
    pub async fn allow(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= WINDOW {
            self.window_start = now;
            self.calls_in_window = 0;
        }

        if self.calls_in_window >= self.per_minute {
            let reopen = self.window_start + WINDOW;
            info!(
                calls = self.calls_in_window,
                wait_ms = reopen.saturating_duration_since(now).as_millis() as u64,
                "Rate limit reached, waiting for next window"
            );
            sleep_until(reopen).await;
            self.window_start = Instant::now();
            self.calls_in_window = 0;
        }

        if let Some(last) = self.last_call {
            let earliest = last + self.min_spacing;
            if earliest > Instant::now() {
                sleep_until(earliest).await;
            }
        }

        self.calls_in_window += 1;
        self.total_calls += 1;
        self.last_call = Some(Instant::now());
        debug!(in_window = self.calls_in_window, "API call allowed");
    }

    /// Calls counted since the limiter was created.
    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }
}

/// Tells a run when to stop starting new work.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    started: Instant,
    usable: Duration,
}

impl ExecutionBudget {
    /// Starts the clock. Work stops `safety_margin` before `max_execution`.
    pub fn start(max_execution: Duration, safety_margin: Duration) -> Self {
        ExecutionBudget {
            started: Instant::now(),
            usable: max_execution.saturating_sub(safety_margin),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed() > self.usable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_waits_for_window() {
        let mut limiter = RateLimiter::new(3, Duration::ZERO);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.allow().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));

        limiter.allow().await;
        assert!(start.elapsed() >= WINDOW);
        assert_eq!(limiter.total_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_between_calls() {
        let mut limiter = RateLimiter::new(600, Duration::from_millis(100));
        let start = Instant::now();

        limiter.allow().await;
        limiter.allow().await;
        limiter.allow().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_a_minute() {
        let mut limiter = RateLimiter::new(2, Duration::ZERO);
        limiter.allow().await;
        limiter.allow().await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let before = Instant::now();
        limiter.allow().await;
        assert!(before.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion() {
        let budget = ExecutionBudget::start(Duration::from_secs(300), Duration::from_secs(30));
        assert!(!budget.is_exhausted());

        tokio::time::advance(Duration::from_secs(269)).await;
        assert!(!budget.is_exhausted());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(budget.is_exhausted());
    }
}
