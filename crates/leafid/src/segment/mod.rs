//! Database-backed segment allocation.
//!
//! Each business key owns a [`SegmentBuffer`]: two ranges of ids, one serving
//! while the other is refilled in the background from an
//! [`AllocationStore`]. The [`SegmentAllocator`] keeps one buffer per stored
//! key, tunes the batch size with [`next_step`], and re-syncs the key set on a
//! fixed interval.

mod allocator;
mod buffer;
mod config;
mod step;
mod store;
#[cfg(test)]
mod tests;

pub use allocator::*;
pub use buffer::*;
pub use config::*;
pub use step::*;
pub use store::*;
