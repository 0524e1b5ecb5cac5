//! Protocol time utilities.
//!
//! All protocol timestamps are NTP seconds (seconds since 1900-01-01 UTC),
//! as exchanged with the server and carried in hello messages.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Seconds between the NTP era (1900-01-01) and the Unix epoch (1970-01-01).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Seconds per day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Returns the current time as NTP seconds.
pub fn now_ntp() -> u64 {
    unix_to_ntp(now_timestamp())
}

/// Convert Unix seconds to NTP seconds. Pre-1900 values clamp to zero.
pub fn unix_to_ntp(unix_secs: i64) -> u64 {
    (unix_secs + NTP_UNIX_OFFSET as i64).max(0) as u64
}

/// Convert NTP seconds to Unix seconds.
pub fn ntp_to_unix(ntp_secs: u64) -> i64 {
    ntp_secs as i64 - NTP_UNIX_OFFSET as i64
}

/// Convert NTP seconds to a UTC date-time.
pub fn ntp_to_datetime(ntp_secs: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ntp_to_unix(ntp_secs), 0).single()
}

/// Source of wall-clock time for every time-dependent component.
///
/// Injected so epoch computation and retention checks can be driven
/// deterministically.
pub trait Clock: Send + Sync {
    /// Current time in NTP seconds.
    fn now_ntp(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ntp(&self) -> u64 {
        now_ntp()
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `ntp_secs`.
    pub fn new(ntp_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(ntp_secs),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, ntp_secs: u64) {
        self.now.store(ntp_secs, Ordering::SeqCst);
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ntp(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_is_reasonable() {
        let ts = now_timestamp();
        // Should be after 2024-01-01 (1704067200)
        assert!(ts > 1704067200, "Timestamp {} is too old", ts);
        // Should be before 2100-01-01 (4102444800)
        assert!(ts < 4102444800, "Timestamp {} is too far in future", ts);
    }

    #[test]
    fn test_ntp_round_trip() {
        let unix = 1_700_000_000;
        let ntp = unix_to_ntp(unix);
        assert_eq!(ntp, 1_700_000_000 + NTP_UNIX_OFFSET);
        assert_eq!(ntp_to_unix(ntp), unix);
    }

    #[test]
    fn test_ntp_to_datetime() {
        let dt = ntp_to_datetime(NTP_UNIX_OFFSET).unwrap();
        assert_eq!(dt.timestamp(), 0);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_ntp(), 1000);
        clock.advance(900);
        assert_eq!(clock.now_ntp(), 1900);
        clock.set(5);
        assert_eq!(clock.now_ntp(), 5);
    }
}
