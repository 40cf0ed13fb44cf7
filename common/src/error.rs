use thiserror::Error;

use crate::types::NodeId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no {field} slot for id {id}")]
    NoSuchField { field: &'static str, id: u8 },
    #[error("address range {start}..{end} exceeds store size {size}")]
    OutOfRange { start: usize, end: usize, size: usize },
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message tag {0:?}")]
    UnknownTag(String),
    #[error("missing field {0:?}")]
    MissingField(&'static str),
    #[error("node state {0} is neither 0 nor 1")]
    InvalidState(i64),
    #[error("sensor uid {0:?} is not 16 hex digits")]
    InvalidUid(String),
    #[error("server address {0:?} is not a dotted quad")]
    InvalidAddress(String),
    #[error("credential longer than {max} bytes")]
    CredentialTooLong { max: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{0} link is disconnected")]
    Disconnected(String),
    #[error("{0} link backlog is full")]
    Backlog(String),
    #[error("{link} link i/o failure: {reason}")]
    Io { link: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{node} did not reach commanded state {commanded}")]
pub struct ActuatorFault {
    pub node: NodeId,
    pub commanded: bool,
}
