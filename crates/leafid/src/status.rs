use core::fmt;

use serde::Serialize;

use crate::error::Result;

/// Outcome marker carried by every [`IdResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// The id is usable.
    Success,
    /// The id is a negative sentinel code and must not be used.
    Exception,
}

/// Represents the result of a single id request.
///
/// This is the wire-level shape handed to callers: a numeric id and a status.
/// When `status` is [`Status::Exception`] the id is a negative sentinel code
/// (see [`Error::code`]) and never a usable identifier.
///
/// # Example
///
/// ```
/// use leafid::{Error, IdResult, Status};
///
/// let ok = IdResult::from(Ok::<i64, Error>(42));
/// assert_eq!(ok.status, Status::Success);
///
/// let failed = IdResult::from(Err::<i64, _>(Error::NotInitialized));
/// assert_eq!(failed.id, -1);
/// assert_eq!(failed.status, Status::Exception);
/// ```
///
/// [`Error::code`]: crate::Error::code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct IdResult {
    /// The generated id, or a negative sentinel on failure.
    pub id: i64,
    /// Whether `id` is usable.
    pub status: Status,
}

impl IdResult {
    pub const fn success(id: i64) -> Self {
        Self {
            id,
            status: Status::Success,
        }
    }

    pub const fn exception(code: i64) -> Self {
        Self {
            id: code,
            status: Status::Exception,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }
}

impl From<Result<i64>> for IdResult {
    fn from(result: Result<i64>) -> Self {
        match result {
            Ok(id) => Self::success(id),
            Err(e) => Self::exception(e.code()),
        }
    }
}

impl fmt::Display for IdResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            Status::Success => "SUCCESS",
            Status::Exception => "EXCEPTION",
        };
        write!(f, "IdResult{{id={}, status={status}}}", self.id)
    }
}
