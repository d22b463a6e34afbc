use core::time::Duration;

use crate::segment::step::{MAX_STEP, SEGMENT_DURATION};

/// Tuning knobs for [`SegmentAllocator`].
///
/// The defaults reproduce the production behavior: a 60 second key-set sync,
/// a refill dispatched once a tenth of the active segment is consumed, and a
/// refill wait of 10,000 spins followed by one 10ms sleep.
///
/// [`SegmentAllocator`]: crate::SegmentAllocator
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Delay between background key-set syncs.
    pub sync_interval: Duration,

    /// A refill of the standby segment is dispatched once the active
    /// segment's idle count drops below `refill_threshold * step`.
    pub refill_threshold: f64,

    /// Cooperative spins spent waiting on an in-flight refill before the
    /// single fallback sleep.
    pub refill_spin_limit: u32,

    /// The fallback sleep after `refill_spin_limit` spins. After it the caller
    /// proceeds whether or not the refill finished.
    pub refill_wait: Duration,

    /// Upper bound on refill tasks talking to the store at the same time.
    pub max_concurrent_refills: usize,

    /// Largest step the adaptive policy will grow to.
    pub max_step: i64,

    /// Refill interval below which the step doubles. Between one and two
    /// durations the step is kept; beyond two it halves.
    pub segment_duration: Duration,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            refill_threshold: 0.9,
            refill_spin_limit: 10_000,
            refill_wait: Duration::from_millis(10),
            max_concurrent_refills: 32,
            max_step: MAX_STEP,
            segment_duration: SEGMENT_DURATION,
        }
    }
}
