use core::time::Duration;

use crate::segment::config::SegmentConfig;

/// Largest batch the adaptive policy requests from the store.
pub const MAX_STEP: i64 = 1_000_000;

/// Refill cadence the adaptive policy aims for.
pub const SEGMENT_DURATION: Duration = Duration::from_secs(15 * 60);

/// Step bookkeeping carried by a [`SegmentBuffer`] between refills.
///
/// [`SegmentBuffer`]: crate::SegmentBuffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTuning {
    /// Step used for the most recent population.
    pub step: i64,
    /// Step configured in the store; the floor when shrinking.
    pub min_step: i64,
    /// Millisecond timestamp of the last refill, unset until the second
    /// population.
    pub last_refill: Option<u64>,
}

/// Computes the step for the next refill from how long the previous segment
/// lasted.
///
/// - `elapsed < segment_duration`: double, unless that would pass `max_step`
/// - `elapsed < 2 * segment_duration`: keep
/// - otherwise: halve, unless that would fall below `min_step`
///
/// A step that cannot move in the requested direction is kept as is.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use leafid::{SegmentConfig, next_step};
///
/// let config = SegmentConfig::default();
/// let minutes = |m: u64| Duration::from_secs(m * 60);
///
/// assert_eq!(next_step(100, 100, minutes(5), &config), 200);
/// assert_eq!(next_step(200, 100, minutes(20), &config), 200);
/// assert_eq!(next_step(200, 100, minutes(40), &config), 100);
/// assert_eq!(next_step(100, 100, minutes(40), &config), 100);
/// ```
pub fn next_step(step: i64, min_step: i64, elapsed: Duration, config: &SegmentConfig) -> i64 {
    if elapsed < config.segment_duration {
        let doubled = step.saturating_mul(2);
        if doubled > config.max_step {
            step
        } else {
            doubled
        }
    } else if elapsed < config.segment_duration * 2 {
        step
    } else if step / 2 >= min_step {
        step / 2
    } else {
        step
    }
}
