use async_trait::async_trait;

use crate::status::IdResult;

/// A minimal interface shared by every id issuing mode.
///
/// Implemented by [`SegmentAllocator`], [`SnowflakeGenerator`] and
/// [`ZeroIdGenerator`], so a server can hold whichever mode is configured
/// behind one trait object.
///
/// [`SegmentAllocator`]: crate::SegmentAllocator
/// [`SnowflakeGenerator`]: crate::SnowflakeGenerator
#[async_trait]
pub trait IdGenerator: Send + Sync {
    /// Issues the next id for `key`.
    ///
    /// Failures are reported in-band as [`Status::Exception`] results, never
    /// as panics.
    ///
    /// [`Status::Exception`]: crate::Status::Exception
    async fn get(&self, key: &str) -> IdResult;
}

/// Stand-in generator for an administratively disabled mode.
///
/// Always succeeds with id `0`.
#[derive(Default, Clone, Copy, Debug)]
pub struct ZeroIdGenerator;

#[async_trait]
impl IdGenerator for ZeroIdGenerator {
    async fn get(&self, _key: &str) -> IdResult {
        IdResult::success(0)
    }
}
