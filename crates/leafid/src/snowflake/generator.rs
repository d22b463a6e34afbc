use core::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result},
    generator::IdGenerator,
    rand::{RandSource, ThreadRandom},
    snowflake::id::SnowflakeId,
    status::IdResult,
    time::{SystemClock, TWITTER_EPOCH, TimeSource},
};

/// Largest backwards clock step the generator waits out. Anything larger is
/// rejected immediately.
pub const MAX_BACKWARD_MS: u64 = 5;

/// Sequence values a new millisecond starts from are drawn from
/// `0..SEQUENCE_RESEED_BOUND`.
pub const SEQUENCE_RESEED_BOUND: u64 = 100;

/// Outcome of a single non-blocking generation attempt.
///
/// - [`IdGenStatus::Ready`] carries a freshly issued id.
/// - [`IdGenStatus::Pending`] means the sequence is exhausted for the current
///   millisecond; retry after `yield_for` milliseconds.
/// - [`IdGenStatus::Behind`] means the clock reads `offset` milliseconds
///   before the last issued timestamp; retry once after `yield_for`
///   milliseconds and give up if it is still behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    Ready { id: SnowflakeId },
    Pending { yield_for: u64 },
    Behind { offset: u64, yield_for: u64 },
}

#[derive(Debug, Default)]
struct State {
    last_timestamp: u64,
    sequence: i64,
    interrupts: u64,
}

/// A lock-based Snowflake generator for one worker.
///
/// All state sits behind a single mutex that is never held while waiting.
/// [`try_next_id`](Self::try_next_id) never blocks: when the clock stepped
/// back or the sequence is exhausted it reports how long to back off.
/// [`next_id_async`](Self::next_id_async) sleeps that time on the tokio timer
/// and is what [`IdGenerator::get`] uses; [`next_id`](Self::next_id) parks
/// the calling thread instead.
///
/// Each new millisecond starts its sequence at a random value below
/// [`SEQUENCE_RESEED_BOUND`] so low-traffic workers do not always emit even
/// ids.
///
/// # Example
///
/// ```
/// use leafid::SnowflakeGenerator;
///
/// let generator = SnowflakeGenerator::new(7)?;
/// let a = generator.next_id()?;
/// let b = generator.next_id()?;
///
/// assert_eq!(a.worker_id(), 7);
/// assert!(b > a);
/// # Ok::<(), leafid::Error>(())
/// ```
#[derive(Debug)]
pub struct SnowflakeGenerator<T = SystemClock, R = ThreadRandom>
where
    T: TimeSource,
    R: RandSource,
{
    worker_id: i64,
    state: Mutex<State>,
    wakeup: Condvar,
    interrupted: Notify,
    time: T,
    rng: R,
}

impl SnowflakeGenerator {
    /// Creates a generator on the Twitter epoch with the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerIdOutOfRange`] unless
    /// `0 <= worker_id <= 1023`.
    pub fn new(worker_id: i64) -> Result<Self> {
        Self::with_time(worker_id, SystemClock::with_epoch(TWITTER_EPOCH))
    }
}

impl<T: TimeSource> SnowflakeGenerator<T> {
    /// Creates a generator reading timestamps from `time`. Timestamps are
    /// packed as-is, so `time` must already be relative to the desired
    /// epoch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerIdOutOfRange`] unless
    /// `0 <= worker_id <= 1023`.
    pub fn with_time(worker_id: i64, time: T) -> Result<Self> {
        Self::with_rand(worker_id, time, ThreadRandom)
    }
}

impl<T, R> SnowflakeGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    /// Creates a generator with explicit time and random sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerIdOutOfRange`] unless
    /// `0 <= worker_id <= 1023`.
    pub fn with_rand(worker_id: i64, time: T, rng: R) -> Result<Self> {
        if !(0..=SnowflakeId::MAX_WORKER_ID).contains(&worker_id) {
            return Err(Error::WorkerIdOutOfRange {
                worker_id,
                max: SnowflakeId::MAX_WORKER_ID,
            });
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(State::default()),
            wakeup: Condvar::new(),
            interrupted: Notify::new(),
            time,
            rng,
        })
    }

    pub const fn worker_id(&self) -> i64 {
        self.worker_id
    }

    /// Timestamp of the most recently issued id.
    pub fn last_timestamp(&self) -> u64 {
        self.state.lock().last_timestamp
    }

    /// Attempts to issue an id without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClockRollbackTooLarge`] if the clock stepped back
    /// more than [`MAX_BACKWARD_MS`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_next_id(&self) -> Result<IdGenStatus> {
        let mut state = self.state.lock();
        let now = self.time.current_millis();

        if now < state.last_timestamp {
            let offset = state.last_timestamp - now;
            if offset > MAX_BACKWARD_MS {
                #[cfg(feature = "tracing")]
                tracing::error!(offset, "clock moved backwards, rejecting request");
                return Err(Error::ClockRollbackTooLarge { offset });
            }
            return Ok(IdGenStatus::Behind {
                offset,
                yield_for: offset * 2,
            });
        }

        if now == state.last_timestamp {
            let sequence = (state.sequence + 1) & SnowflakeId::SEQUENCE_MASK;
            if sequence == 0 {
                return Ok(IdGenStatus::Pending { yield_for: 1 });
            }
            state.sequence = sequence;
        } else {
            state.sequence = self.reseed();
            state.last_timestamp = now;
        }

        Ok(IdGenStatus::Ready {
            id: SnowflakeId::from_components(now, self.worker_id, state.sequence),
        })
    }

    /// Issues the next id, sleeping on the tokio timer while the clock is
    /// behind or the sequence is exhausted. The runtime thread stays free.
    ///
    /// # Errors
    ///
    /// - [`Error::ClockRollback`] if the clock is still behind after waiting
    ///   twice the offset
    /// - [`Error::ClockRollbackTooLarge`] if the clock stepped back more than
    ///   [`MAX_BACKWARD_MS`]
    /// - [`Error::Interrupted`] if [`interrupt`](Self::interrupt) was called
    ///   during the wait
    pub async fn next_id_async(&self) -> Result<SnowflakeId> {
        let interrupted = self.interrupted.notified();
        tokio::pin!(interrupted);
        interrupted.as_mut().enable();

        let mut rollback = None;
        loop {
            let wait = match self.try_next_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { yield_for } => yield_for,
                IdGenStatus::Behind { offset, yield_for } => {
                    check_rollback(&mut rollback, offset)?;
                    yield_for
                }
            };
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(wait)) => {}
                () = interrupted.as_mut() => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("rollback wait interrupted");
                    return Err(Error::Interrupted);
                }
            }
        }
    }

    /// Issues the next id, parking the calling thread while the clock is
    /// behind or the sequence is exhausted. Prefer
    /// [`next_id_async`](Self::next_id_async) on a runtime thread.
    ///
    /// # Errors
    ///
    /// Same as [`next_id_async`](Self::next_id_async).
    pub fn next_id(&self) -> Result<SnowflakeId> {
        let seen = self.state.lock().interrupts;
        let mut rollback = None;
        loop {
            let wait = match self.try_next_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { yield_for } => yield_for,
                IdGenStatus::Behind { offset, yield_for } => {
                    check_rollback(&mut rollback, offset)?;
                    yield_for
                }
            };
            self.park(seen, wait)?;
        }
    }

    /// Wakes every caller waiting in [`next_id`](Self::next_id) or
    /// [`next_id_async`](Self::next_id_async); each returns
    /// [`Error::Interrupted`].
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupts = state.interrupts.wrapping_add(1);
        self.wakeup.notify_all();
        drop(state);
        self.interrupted.notify_waiters();
    }

    /// Blocks for `millis` unless an interrupt newer than `seen` arrives.
    fn park(&self, seen: u64, millis: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(millis);
        let mut state = self.state.lock();
        loop {
            if state.interrupts != seen {
                #[cfg(feature = "tracing")]
                tracing::error!("rollback wait interrupted");
                return Err(Error::Interrupted);
            }
            if self.wakeup.wait_until(&mut state, deadline).timed_out() {
                return if state.interrupts == seen {
                    Ok(())
                } else {
                    Err(Error::Interrupted)
                };
            }
        }
    }

    fn reseed(&self) -> i64 {
        (self.rng.rand() % SEQUENCE_RESEED_BOUND) as i64
    }
}

/// A rollback is waited out once. Seeing the clock behind again fails with
/// the offset first observed.
fn check_rollback(rollback: &mut Option<u64>, offset: u64) -> Result<()> {
    match *rollback {
        Some(first) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(offset = first, "clock still behind after waiting");
            Err(Error::ClockRollback { offset: first })
        }
        None => {
            *rollback = Some(offset);
            Ok(())
        }
    }
}

#[async_trait]
impl<T, R> IdGenerator for SnowflakeGenerator<T, R>
where
    T: TimeSource + Send + Sync,
    R: RandSource + Send + Sync,
{
    /// The key is ignored; every key draws from the same worker sequence.
    async fn get(&self, _key: &str) -> IdResult {
        self.next_id_async().await.map(|id| id.to_raw()).into()
    }
}
