use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use portable_atomic::{AtomicBool, AtomicI64, Ordering};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    segment::{config::SegmentConfig, step::StepTuning},
};

/// A contiguous range `[start, max)` of ids served by bumping a counter.
///
/// All three fields are atomics: the active segment's counter is bumped under
/// the buffer's shared lock, and the standby segment is rewritten by the
/// refill task without any buffer lock (no caller reads it until the switch,
/// which happens under the exclusive lock).
#[derive(Debug, Default)]
pub struct Segment {
    value: AtomicI64,
    max: AtomicI64,
    step: AtomicI64,
}

impl Segment {
    /// Next value the counter will hand out.
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Exclusive upper bound of the range.
    pub fn max(&self) -> i64 {
        self.max.load(Ordering::Acquire)
    }

    /// Size the range was populated with.
    pub fn step(&self) -> i64 {
        self.step.load(Ordering::Acquire)
    }

    /// Ids left before exhaustion. Negative once callers overshoot `max`.
    pub fn idle(&self) -> i64 {
        self.max() - self.value()
    }

    pub(crate) fn reset(&self, start: i64, max: i64, step: i64) {
        self.max.store(max, Ordering::Release);
        self.step.store(step, Ordering::Release);
        self.value.store(start, Ordering::Release);
    }

    /// Returns the pre-increment counter value.
    fn fetch_next(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel)
    }

    fn is_depleting(&self, threshold: f64) -> bool {
        (self.idle() as f64) < threshold * self.step() as f64
    }

    fn snapshot(&self) -> SegmentSnapshot {
        SegmentSnapshot {
            value: self.value(),
            max: self.max(),
            step: self.step(),
            idle: self.idle(),
        }
    }
}

/// State only mutated under the buffer's exclusive lock.
#[derive(Debug, Default)]
struct BufferState {
    current: usize,
    next_ready: bool,
}

/// Per-key double buffer of id ranges.
///
/// One segment serves while the other is refilled ahead of exhaustion. The
/// buffer owns its concurrency control:
///
/// - an `RwLock` whose shared side admits concurrent counter bumps and
///   refill-trigger checks, and whose exclusive side guards the active index
///   and the `next_ready` flag;
/// - a CAS-guarded `refill_in_progress` flag allowing at most one background
///   refill at a time;
/// - an async mutex serializing the one-time lazy population.
#[derive(Debug)]
pub struct SegmentBuffer {
    key: String,
    segments: [Segment; 2],
    state: RwLock<BufferState>,
    initialized: AtomicBool,
    refill_in_progress: AtomicBool,
    tuning: Mutex<StepTuning>,
    init_lock: tokio::sync::Mutex<()>,
}

impl SegmentBuffer {
    /// Creates an empty, uninitialized buffer for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            segments: [Segment::default(), Segment::default()],
            state: RwLock::new(BufferState::default()),
            initialized: AtomicBool::new(false),
            refill_in_progress: AtomicBool::new(false),
            tuning: Mutex::new(StepTuning::default()),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the active segment has been populated at least once.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_next_ready(&self) -> bool {
        self.state.read().next_ready
    }

    pub fn is_refill_in_progress(&self) -> bool {
        self.refill_in_progress.load(Ordering::Acquire)
    }

    /// Index of the segment currently serving.
    pub fn current_index(&self) -> usize {
        self.state.read().current
    }

    /// Index of the standby segment.
    pub fn next_index(&self) -> usize {
        (self.current_index() + 1) % 2
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index]
    }

    pub fn tuning(&self) -> StepTuning {
        *self.tuning.lock()
    }

    pub(crate) fn set_tuning(&self, tuning: StepTuning) {
        *self.tuning.lock() = tuning;
    }

    pub(crate) fn init_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.init_lock
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Publishes the outcome of a background refill.
    ///
    /// On success the standby segment becomes switchable. Either way the
    /// refill slot is released so a later call may dispatch again.
    pub(crate) fn finish_refill(&self, populated: bool) {
        if populated {
            let mut state = self.state.write();
            state.next_ready = true;
            self.refill_in_progress.store(false, Ordering::Release);
        } else {
            self.refill_in_progress.store(false, Ordering::Release);
        }
    }

    /// Hands out the next id, switching segments when the active one runs
    /// dry.
    ///
    /// `dispatch_refill` is invoked (at most once per refill cycle, while the
    /// shared lock is held) to start populating the standby segment. It must
    /// not block; it is expected to spawn a task that eventually calls
    /// [`SegmentBuffer::finish_refill`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BothSegmentsExhausted`] when the active segment is
    /// spent and the standby segment is still not ready after the bounded
    /// wait.
    pub(crate) async fn next_id<F>(
        self: &Arc<Self>,
        config: &SegmentConfig,
        dispatch_refill: F,
    ) -> Result<i64>
    where
        F: Fn(Arc<Self>),
    {
        loop {
            {
                let state = self.state.read();
                let segment = &self.segments[state.current];
                if !state.next_ready
                    && segment.is_depleting(config.refill_threshold)
                    && self
                        .refill_in_progress
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    dispatch_refill(Arc::clone(self));
                }
                let value = segment.fetch_next();
                if value < segment.max() {
                    return Ok(value);
                }
            }

            self.wait_for_refill(config).await;

            {
                let mut state = self.state.write();
                let segment = &self.segments[state.current];
                let value = segment.fetch_next();
                if value < segment.max() {
                    return Ok(value);
                }
                if state.next_ready {
                    state.current = (state.current + 1) % 2;
                    state.next_ready = false;
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::error!(key = %self.key, "both segments are not ready");
                    return Err(Error::BothSegmentsExhausted {
                        key: self.key.clone(),
                    });
                }
            }
        }
    }

    /// Best-effort wait for an in-flight refill.
    ///
    /// Spins cooperatively up to the configured limit, then sleeps once and
    /// returns regardless. The exclusive-lock re-check that follows is what
    /// decides the outcome.
    async fn wait_for_refill(&self, config: &SegmentConfig) {
        let mut roll = 0_u32;
        while self.refill_in_progress.load(Ordering::Acquire) {
            roll += 1;
            if roll > config.refill_spin_limit {
                tokio::time::sleep(config.refill_wait).await;
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Captures a point-in-time view of the buffer for inspection.
    pub fn snapshot(&self) -> BufferSnapshot {
        let (current, next_ready) = {
            let state = self.state.read();
            (state.current, state.next_ready)
        };
        let tuning = self.tuning();
        BufferSnapshot {
            key: self.key.clone(),
            initialized: self.is_initialized(),
            current,
            next_ready,
            refill_in_progress: self.is_refill_in_progress(),
            step: tuning.step,
            min_step: tuning.min_step,
            last_refill: tuning.last_refill,
            segments: [self.segments[0].snapshot(), self.segments[1].snapshot()],
        }
    }
}

/// Serializable view of one [`Segment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentSnapshot {
    pub value: i64,
    pub max: i64,
    pub step: i64,
    pub idle: i64,
}

/// Serializable view of one [`SegmentBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferSnapshot {
    pub key: String,
    pub initialized: bool,
    pub current: usize,
    pub next_ready: bool,
    pub refill_in_progress: bool,
    pub step: i64,
    pub min_step: i64,
    pub last_refill: Option<u64>,
    pub segments: [SegmentSnapshot; 2],
}
