use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// Source of the broker's notion of "now", in integer Unix seconds.
///
/// All scores written to the delayed and reserved sets derive from a single
/// clock so tests can substitute a fixed one.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> i64 + Send + Sync>);

impl Clock {
    #[must_use]
    pub fn system() -> Self {
        Self(Arc::new(|| Utc::now().timestamp()))
    }

    #[must_use]
    pub fn fixed(at: i64) -> Self {
        Self(Arc::new(move || at))
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Clock").finish()
    }
}

/// When a delayed or released job becomes visible again.
#[derive(Debug, Clone, Copy)]
pub enum Delay {
    /// An absolute instant; the resolved time is the instant itself.
    Until(DateTime<Utc>),
    /// A duration relative to now.
    For(Duration),
    /// A plain seconds offset relative to now.
    Seconds(i64),
}

impl Delay {
    #[must_use]
    pub fn available_at(&self, now: i64) -> i64 {
        match self {
            Delay::Until(at) => at.timestamp(),
            Delay::For(duration) => now + duration.num_seconds(),
            Delay::Seconds(seconds) => now + seconds,
        }
    }
}

impl From<i64> for Delay {
    fn from(seconds: i64) -> Self {
        Delay::Seconds(seconds)
    }
}

impl From<Duration> for Delay {
    fn from(duration: Duration) -> Self {
        Delay::For(duration)
    }
}

impl From<DateTime<Utc>> for Delay {
    fn from(at: DateTime<Utc>) -> Self {
        Delay::Until(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn seconds_offset_adds_to_now() {
        assert_eq!(Delay::Seconds(30).available_at(1_000), 1_030);
        assert_eq!(Delay::Seconds(0).available_at(1_000), 1_000);
    }

    #[test]
    fn duration_resolves_to_whole_seconds() {
        assert_eq!(Delay::For(Duration::minutes(2)).available_at(1_000), 1_120);
    }

    #[test]
    fn absolute_instant_ignores_now() {
        let at = Utc.timestamp_opt(5_000, 0).unwrap();
        assert_eq!(Delay::Until(at).available_at(1_000), 5_000);
    }

    #[test]
    fn fixed_clock_is_stable() {
        let clock = Clock::fixed(42);
        assert_eq!(clock.now(), 42);
        assert_eq!(clock.now(), 42);
    }
}
