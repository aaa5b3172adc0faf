//! Deterministic clock for simulation
//!
//! TigerStyle: explicit time control, no system time dependencies.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use naiad_core::io::TimeProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Deterministic simulation clock.
///
/// Time only advances when explicitly told to. Tasks sleeping on the clock
/// are woken by `advance`, which is what lets scheduler tests fast-forward
/// through a whole day in microseconds.
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Current time in milliseconds since epoch
    current_time_ms: Arc<AtomicU64>,
    /// Notify waiters when time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a clock starting at the given time.
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self::from_millis(start_time.timestamp_millis() as u64)
    }

    /// Create a clock starting at a specific millisecond timestamp.
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Current time.
    pub fn now(&self) -> DateTime<Utc> {
        let ms = self.current_time_ms.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(ms as i64)
            .unwrap_or_else(|| DateTime::from_timestamp_millis(0).unwrap())
    }

    /// Advance time by the given duration.
    pub fn advance(&self, duration: Duration) {
        debug_assert!(duration >= Duration::zero(), "cannot go back in time");
        self.advance_ms(duration.num_milliseconds() as u64);
    }

    /// Advance time by the given number of milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Set the current time (use with caution; clock-jump tests only).
    pub fn set_ms(&self, ms: u64) {
        self.current_time_ms.store(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if a deadline (in ms) has passed.
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.current_time_ms.load(Ordering::SeqCst) >= deadline_ms
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.now_ms() + ms;

        while self.now_ms() < target_ms {
            self.notify.notified().await;
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC for predictable test behavior
        Self::from_millis(1_704_067_200_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance() {
        let clock = SimClock::from_millis(0);
        assert_eq!(clock.now_ms(), 0);

        clock.advance_ms(1000);
        assert_eq!(clock.now_ms(), 1000);

        clock.advance(Duration::seconds(2));
        assert_eq!(clock.now_ms(), 3000);
    }

    #[test]
    fn test_clock_now_utc() {
        let clock = SimClock::default();
        assert_eq!(clock.now().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_clock_is_past() {
        let clock = SimClock::from_millis(1000);

        assert!(clock.is_past_ms(500));
        assert!(clock.is_past_ms(1000));
        assert!(!clock.is_past_ms(1500));
    }

    #[tokio::test]
    async fn test_clock_sleep_parks_until_advanced() {
        let clock = SimClock::from_millis(0);
        let sleeper = clock.clone();

        let handle = tokio::spawn(async move {
            sleeper.sleep_ms(100).await;
            sleeper.now_ms()
        });

        tokio::task::yield_now().await;
        clock.advance_ms(50);
        tokio::task::yield_now().await;
        clock.advance_ms(50);
        tokio::task::yield_now().await;

        let woke_at = handle.await.unwrap();
        assert!(woke_at >= 100);
    }
}
