//! Millisecond timestamps and time-to-live readings
//!
//! Expiration in kvrepo is expressed in milliseconds, matching the
//! resolution of the store's PEXPIRE / PEXPIREAT / PTTL commands.
//!
//! ```
//! use kvrepo_core::Timestamp;
//! use std::time::Duration;
//!
//! let at = Timestamp::from_millis(1_000);
//! assert_eq!(at.saturating_add(Duration::from_millis(500)).as_millis(), 1_500);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Current wall-clock time
    ///
    /// Returns epoch if the system clock is before Unix epoch.
    pub fn now() -> Self {
        Timestamp::from(SystemTime::now())
    }

    /// Create a timestamp from milliseconds since epoch
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Milliseconds since epoch
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add a duration, saturating at the maximum timestamp
    pub fn saturating_add(&self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(millis))
    }

    /// Time left until `self`, measured from `now`
    ///
    /// Returns `None` once `now` has reached `self`.
    pub fn remaining_from(&self, now: Timestamp) -> Option<Duration> {
        if self.0 > now.0 {
            Some(Duration::from_millis(self.0 - now.0))
        } else {
            None
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Timestamp(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
    /// The key does not exist
    Missing,
    /// The key exists and never expires
    Persistent,
    /// The key expires after this duration
    Expires(Duration),
}

impl TimeToLive {
    /// PTTL-style reading: `-2` missing, `-1` persistent, else milliseconds left
    pub fn as_millis(&self) -> i64 {
        match self {
            TimeToLive::Missing => -2,
            TimeToLive::Persistent => -1,
            TimeToLive::Expires(left) => i64::try_from(left.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Remaining duration, if the key expires
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            TimeToLive::Expires(left) => Some(*left),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(Timestamp::now() > Timestamp::from_millis(1_577_836_800_000));
    }

    #[test]
    fn test_saturating_add() {
        let ts = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(ts.saturating_add(Duration::from_secs(10)).as_millis(), u64::MAX);
    }

    #[test]
    fn test_remaining_from() {
        let deadline = Timestamp::from_millis(1_500);
        assert_eq!(
            deadline.remaining_from(Timestamp::from_millis(1_000)),
            Some(Duration::from_millis(500))
        );
        assert_eq!(deadline.remaining_from(Timestamp::from_millis(1_500)), None);
        assert_eq!(deadline.remaining_from(Timestamp::from_millis(2_000)), None);
    }

    #[test]
    fn test_from_system_time() {
        let time = UNIX_EPOCH + Duration::from_millis(42);
        assert_eq!(Timestamp::from(time), Timestamp::from_millis(42));

        let before_epoch = UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(Timestamp::from(before_epoch), Timestamp::EPOCH);
    }

    #[test]
    fn test_ttl_sentinels() {
        assert_eq!(TimeToLive::Missing.as_millis(), -2);
        assert_eq!(TimeToLive::Persistent.as_millis(), -1);
        assert_eq!(
            TimeToLive::Expires(Duration::from_millis(1_234)).as_millis(),
            1_234
        );
        assert_eq!(TimeToLive::Persistent.remaining(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Timestamp::from_millis(7).to_string(), "7ms");
    }
}
