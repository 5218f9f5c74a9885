//! Time utilities with a clock abstraction for testability.

use chrono::{TimeZone, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Current Unix timestamp in UTC (milliseconds)
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: i64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: fixed_time_millis,
        }
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.fixed_time
    }
}

/// Current Unix timestamp in UTC (milliseconds)
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a Unix timestamp (milliseconds) to an RFC 3339 string
pub fn timestamp_to_rfc3339(timestamp_millis: i64) -> String {
    let seconds = timestamp_millis.div_euclid(1000);
    let nanos = (timestamp_millis.rem_euclid(1000) * 1_000_000) as u32;
    match Utc.timestamp_opt(seconds, nanos) {
        chrono::LocalResult::Single(dt) => dt.to_rfc3339(),
        _ => format!("<invalid timestamp {timestamp_millis}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_returns_non_zero_timestamp() {
        let clock = SystemClock;

        let timestamp = clock.now_millis();

        assert!(timestamp > 0);
    }

    #[test]
    fn test_system_clock_returns_increasing_timestamps() {
        let clock = SystemClock;

        let timestamp1 = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let timestamp2 = clock.now_millis();

        assert!(timestamp2 >= timestamp1);
    }

    #[test]
    fn test_fixed_clock_returns_fixed_timestamp() {
        let fixed_time = 1234567890123;
        let clock = FixedClock::new(fixed_time);

        assert_eq!(clock.now_millis(), fixed_time);
    }

    #[test]
    fn test_fixed_clock_is_consistent_across_calls() {
        let fixed_time = 9876543210987;
        let clock = FixedClock::new(fixed_time);

        assert_eq!(clock.now_millis(), fixed_time);
        assert_eq!(clock.now_millis(), fixed_time);
        assert_eq!(clock.now_millis(), fixed_time);
    }

    #[test]
    fn test_timestamp_to_rfc3339_format() {
        // 2023-01-01 00:00:00 UTC in milliseconds
        let timestamp = 1672531200000;

        let result = timestamp_to_rfc3339(timestamp);

        assert!(result.starts_with("2023-01-01T00:00:00"));
        assert!(result.contains("+00:00"));
    }

    #[test]
    fn test_timestamp_to_rfc3339_with_milliseconds() {
        let timestamp = 1672531200123;

        let result = timestamp_to_rfc3339(timestamp);

        assert!(result.starts_with("2023-01-01T00:00:00.123"));
    }
}
