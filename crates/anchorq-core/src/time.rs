//! Time abstraction for testable timing operations.
//!
//! Retry scheduling and inter-attempt sleeps go through a clock trait so
//! tests can control time deterministically instead of waiting wall-clock
//! seconds for backoff windows.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, TimeZone, Utc};

/// Clock abstraction for timestamps and sleeps.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] to make
/// backoff timing deterministic.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current system time.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    ///
    /// Maps to `tokio::time::sleep` in production; a test clock advances
    /// virtual time immediately instead.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Returns the current time as a UTC timestamp for database rows.
    fn now_utc(&self) -> DateTime<Utc> {
        let since_epoch = self
            .now_system()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX);
        Utc.timestamp_opt(secs, since_epoch.subsec_nanos())
            .single()
            .unwrap_or_default()
    }
}

/// Real clock backed by system time and tokio sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Test clock with manually controlled time.
///
/// Time only moves when a test advances it, so retry windows and attempt
/// spacing can be asserted exactly. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// System time as nanoseconds since UNIX_EPOCH.
    system_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ns = u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);

        Self {
            system_ns: Arc::new(AtomicU64::new(ns)),
        }
    }

    /// Advances the clock by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);
        self.system_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_system(&self) -> SystemTime {
        let ns = self.system_ns.load(Ordering::Acquire);
        UNIX_EPOCH + Duration::from_nanos(ns)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping in tests advances the clock instead of blocking.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_given_time() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let clock = TestClock::with_start_time(start);

        assert_eq!(clock.now_system(), start);

        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now_system(), start + Duration::from_secs(60));
    }

    #[test]
    fn test_clock_utc_conversion() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = TestClock::with_start_time(start);

        assert_eq!(clock.now_utc().timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_clock_sleep_advances_time() {
        let clock = TestClock::new();
        let before = clock.now_system();

        clock.sleep(Duration::from_secs(5)).await;

        let elapsed = clock
            .now_system()
            .duration_since(before)
            .unwrap_or_default();
        assert_eq!(elapsed, Duration::from_secs(5));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::with_start_time(SystemTime::UNIX_EPOCH);
        let view = clock.clone();

        clock.advance(Duration::from_secs(30));
        assert_eq!(view.now_system(), SystemTime::UNIX_EPOCH + Duration::from_secs(30));
    }
}
