//! Millisecond timestamps and duration display.

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// A millisecond unix timestamp, the timestamp unit used throughout the DB
/// schema and the PQ envelope.
#[derive(
    Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(ms)
    }

    #[inline]
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Absolute distance to another timestamp.
    pub fn abs_diff(self, other: Self) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }

    /// Milliseconds elapsed since `earlier`; zero if `earlier` is in the
    /// future.
    pub fn saturating_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0).max(0) as u64)
    }

    pub fn saturating_add(self, delta: Duration) -> Self {
        Self(self.0.saturating_add(delta.as_millis() as i64))
    }

    pub fn saturating_sub(self, delta: Duration) -> Self {
        Self(self.0.saturating_sub(delta.as_millis() as i64))
    }
}

/// Displays a [`Duration`] in integer milliseconds, for request timing logs.
pub struct DisplayMs(pub Duration);

impl fmt::Display for DisplayMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0.as_millis())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn diff_and_saturation() {
        let a = TimestampMs(10_000);
        let b = TimestampMs(12_500);
        assert_eq!(a.abs_diff(b), Duration::from_millis(2_500));
        assert_eq!(b.abs_diff(a), Duration::from_millis(2_500));
        assert_eq!(b.saturating_since(a), Duration::from_millis(2_500));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
        assert_eq!(
            a.saturating_add(Duration::from_secs(1)),
            TimestampMs(11_000)
        );
    }

    #[test]
    fn display_ms() {
        assert_eq!(
            DisplayMs(Duration::from_millis(1234)).to_string(),
            "1234ms"
        );
    }
}
