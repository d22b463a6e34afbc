use core::fmt;

use serde::{Deserialize, Serialize};

/// A 64-bit Snowflake id: 41 bits of timestamp, 10 bits of worker id and 12
/// bits of sequence, with the sign bit left clear.
///
/// ```text
///  Bit Index:  63           63 62            22 21             12 11             0
///              +--------------+----------------+-----------------+---------------+
///  Field:      | reserved (1) | timestamp (41) | worker ID (10)  | sequence (12) |
///              +--------------+----------------+-----------------+---------------+
///              |<----------- MSB ---------- 64 bits ----------- LSB ------------>|
/// ```
///
/// The timestamp is in milliseconds relative to the generator's epoch.
///
/// # Example
///
/// ```
/// use leafid::SnowflakeId;
///
/// let id = SnowflakeId::from_components(1, 3, 7);
/// assert_eq!(id.to_raw(), (1 << 22) | (3 << 12) | 7);
/// assert_eq!(id.timestamp(), 1);
/// assert_eq!(id.worker_id(), 3);
/// assert_eq!(id.sequence(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnowflakeId(i64);

impl SnowflakeId {
    pub const TIMESTAMP_BITS: u32 = 41;
    pub const WORKER_ID_BITS: u32 = 10;
    pub const SEQUENCE_BITS: u32 = 12;

    pub const WORKER_ID_SHIFT: u32 = Self::SEQUENCE_BITS;
    pub const TIMESTAMP_SHIFT: u32 = Self::SEQUENCE_BITS + Self::WORKER_ID_BITS;

    /// Largest worker id the layout can carry (1023).
    pub const MAX_WORKER_ID: i64 = (1 << Self::WORKER_ID_BITS) - 1;
    /// Sequence values wrap at 4096.
    pub const SEQUENCE_MASK: i64 = (1 << Self::SEQUENCE_BITS) - 1;
    pub const TIMESTAMP_MASK: i64 = (1 << Self::TIMESTAMP_BITS) - 1;

    /// Packs the three fields. Out-of-range values are masked to their field
    /// width.
    pub const fn from_components(timestamp: u64, worker_id: i64, sequence: i64) -> Self {
        let t = (timestamp as i64 & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let w = (worker_id & Self::MAX_WORKER_ID) << Self::WORKER_ID_SHIFT;
        let s = sequence & Self::SEQUENCE_MASK;
        Self(t | w | s)
    }

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn to_raw(&self) -> i64 {
        self.0
    }

    /// Milliseconds since the generator's epoch.
    pub const fn timestamp(&self) -> u64 {
        ((self.0 >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK) as u64
    }

    pub const fn worker_id(&self) -> i64 {
        (self.0 >> Self::WORKER_ID_SHIFT) & Self::MAX_WORKER_ID
    }

    pub const fn sequence(&self) -> i64 {
        self.0 & Self::SEQUENCE_MASK
    }
}

impl From<SnowflakeId> for i64 {
    fn from(id: SnowflakeId) -> Self {
        id.to_raw()
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
