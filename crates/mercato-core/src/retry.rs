//! # Retry Schedule
//!
//! Capped exponential backoff for failed webhook events.
//!
//! ```text
//!   failures so far │ 0 │ 1 │ 2 │ 3  │ 4  │ 5+
//!   ────────────────┼───┼───┼───┼────┼────┼────
//!   wait (minutes)  │ 2 │ 4 │ 8 │ 16 │ 32 │ 32
//! ```

use chrono::{DateTime, Duration, Utc};

/// Largest exponent used by the schedule (2^5 = 32 minutes).
pub const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Delay before the next attempt, given the retry count *before* this failure.
pub fn retry_delay(retry_count: i64) -> Duration {
    let exponent = (retry_count.max(0) as u64 + 1).min(MAX_BACKOFF_EXPONENT as u64) as u32;
    Duration::minutes(2_i64.pow(exponent))
}

/// Absolute time of the next attempt after a failure at `now`.
pub fn next_retry_at(now: DateTime<Utc>, retry_count: i64) -> DateTime<Utc> {
    now + retry_delay(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_doubles_then_caps() {
        let minutes: Vec<i64> = (0..7).map(|n| retry_delay(n).num_minutes()).collect();
        assert_eq!(minutes, vec![2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn test_negative_count_is_treated_as_zero() {
        assert_eq!(retry_delay(-3).num_minutes(), 2);
    }
}
