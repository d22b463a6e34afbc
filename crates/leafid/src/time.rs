use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Twitter epoch: Thursday, November 4, 2010 1:42:54.657 UTC
///
/// The default zero-point for Snowflake timestamps.
pub const TWITTER_EPOCH: Duration = Duration::from_millis(1_288_834_974_657);

/// Standard UNIX epoch: Thursday, January 1, 1970 00:00:00 UTC
pub const UNIX_EPOCH_OFFSET: Duration = Duration::from_millis(0);

/// A trait for time sources that return a wall-clock timestamp.
///
/// This abstraction allows you to plug in the real system clock or a mocked
/// time source in tests. The unit is **milliseconds** relative to an origin
/// chosen by the implementation.
///
/// # Example
///
/// ```
/// use leafid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the configured epoch.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// A wall-clock time source backed by [`SystemTime`], offset from a
/// user-defined epoch.
///
/// Unlike a monotonic timer this clock *does* observe NTP corrections and
/// manual adjustments. That is required here: rollback detection in the
/// Snowflake generator and the heartbeat guard in the worker-id coordinator
/// both need to see the wall clock move backwards.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    epoch_offset: u64, // in milliseconds
}

impl Default for SystemClock {
    /// Constructs a clock reporting milliseconds since the UNIX epoch.
    fn default() -> Self {
        Self::with_epoch(UNIX_EPOCH_OFFSET)
    }
}

impl SystemClock {
    /// Constructs a clock whose zero-point is `epoch`, specified as a
    /// [`Duration`] since 1970-01-01 UTC.
    ///
    /// # Example
    ///
    /// ```
    /// use leafid::{SystemClock, TimeSource, TWITTER_EPOCH};
    ///
    /// let unix = SystemClock::default();
    /// let twitter = SystemClock::with_epoch(TWITTER_EPOCH);
    /// assert!(unix.current_millis() > twitter.current_millis());
    /// ```
    pub const fn with_epoch(epoch: Duration) -> Self {
        Self {
            epoch_offset: epoch.as_millis() as u64,
        }
    }

    /// Returns the configured epoch in milliseconds since the UNIX epoch.
    pub const fn epoch_millis(&self) -> u64 {
        self.epoch_offset
    }
}

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        // A clock before 1970 reads as zero; the generators treat that as a
        // rollback.
        let unix_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        unix_millis.saturating_sub(self.epoch_offset)
    }
}
