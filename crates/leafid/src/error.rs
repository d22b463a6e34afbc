use crate::{coordinator::CoordinationError, segment::StoreError};

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `leafid` can emit.
///
/// Request-level variants are converted into an [`IdResult`] with a negative
/// sentinel id through [`Error::code`]. Startup variants
/// ([`Error::CoordinationInitFailure`], [`Error::WorkerIdOutOfRange`],
/// [`Error::ClockBehindRegistration`]) abort initialization of the mode that
/// produced them.
///
/// [`IdResult`]: crate::IdResult
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The segment allocator was used before its first key sync completed.
    #[error("segment allocator is not initialized")]
    NotInitialized,

    /// The requested business key is not present in the segment cache.
    #[error("unknown key `{key}`")]
    UnknownKey { key: String },

    /// The active segment is exhausted and the standby segment was not ready.
    ///
    /// This is fatal for the single request only; the refill pipeline is
    /// lagging and the caller should retry with backoff.
    #[error("both segments of `{key}` are exhausted")]
    BothSegmentsExhausted { key: String },

    /// The clock went backwards and did not recover within the bounded wait.
    #[error("clock moved backwards by {offset}ms")]
    ClockRollback { offset: u64 },

    /// The clock went backwards by more than the tolerated offset.
    #[error("clock moved backwards by {offset}ms, refusing to wait")]
    ClockRollbackTooLarge { offset: u64 },

    /// A rollback wait was interrupted before the clock caught up.
    #[error("interrupted while waiting for the clock to catch up")]
    Interrupted,

    /// The registration node reports a heartbeat newer than the local clock.
    #[error("registered timestamp {registered} is ahead of the local clock {now}")]
    ClockBehindRegistration { registered: u64, now: u64 },

    /// No worker id could be obtained from the coordinator or the local cache.
    #[error("worker id initialization failed: {reason}")]
    CoordinationInitFailure { reason: String },

    /// The resolved worker id does not fit the 10-bit worker field.
    #[error("worker id {worker_id} is outside 0..={max}")]
    WorkerIdOutOfRange { worker_id: i64, max: i64 },

    /// The allocation store rejected or failed a request.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The coordination service rejected or failed a request.
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

impl Error {
    /// Returns the negative sentinel placed in an [`IdResult`] for this error.
    ///
    /// Segment and Snowflake failures share the `-1..=-3` range; the mode is
    /// known from the endpoint that produced the result.
    ///
    /// [`IdResult`]: crate::IdResult
    pub const fn code(&self) -> i64 {
        match self {
            Self::NotInitialized | Self::ClockRollback { .. } => -1,
            Self::UnknownKey { .. } | Self::Interrupted => -2,
            Self::BothSegmentsExhausted { .. } | Self::ClockRollbackTooLarge { .. } => -3,
            Self::Store(_) => -4,
            Self::ClockBehindRegistration { .. }
            | Self::CoordinationInitFailure { .. }
            | Self::WorkerIdOutOfRange { .. }
            | Self::Coordination(_) => -5,
        }
    }
}
