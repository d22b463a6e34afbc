use serde::{Deserialize, Serialize};

use crate::coordinator::service::CoordinationError;

/// Payload stored on a worker's registration node.
///
/// Serialized as `{"ip":"10.0.0.1","port":"8080","timestamp":1700000000000}`.
/// The port is a string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: String,
    /// Wall-clock milliseconds of the last heartbeat.
    pub timestamp: u64,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: impl ToString, timestamp: u64) -> Self {
        Self {
            ip: ip.into(),
            port: port.to_string(),
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CoordinationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CoordinationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A worker's durable identity: one persistent sequential node per address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerRegistration {
    /// `ip:port` the worker listens on.
    pub address: String,
    /// Sequence suffix of the node, used as the worker id.
    pub worker_id: i64,
    /// Timestamp carried by the node payload when it was last read or
    /// written by this process.
    pub last_heartbeat: u64,
}

/// Splits a sequential node name `<address>-<sequence>` into its parts.
///
/// ```
/// use leafid::parse_node_name;
///
/// let (address, worker_id) = parse_node_name("10.0.0.1:8080-0000000012")?;
/// assert_eq!(address, "10.0.0.1:8080");
/// assert_eq!(worker_id, 12);
/// # Ok::<(), leafid::CoordinationError>(())
/// ```
///
/// # Errors
///
/// Returns [`CoordinationError::MalformedNode`] if the name has no `-`, the
/// address part is empty, or the suffix is not a non-negative integer.
pub fn parse_node_name(name: &str) -> Result<(&str, i64), CoordinationError> {
    let malformed = || CoordinationError::MalformedNode {
        name: name.to_owned(),
    };
    let (address, sequence) = name.rsplit_once('-').ok_or_else(malformed)?;
    if address.is_empty() || sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(malformed());
    }
    let worker_id = sequence.parse::<i64>().map_err(|_| malformed())?;
    Ok((address, worker_id))
}
