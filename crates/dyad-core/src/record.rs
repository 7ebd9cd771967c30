use bytes::Bytes;
use dyad_types::{ParticipantId, Status, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::DyadError;

/// Value stored under a file's key: who produced it, and where it lives
/// relative to the managed root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub owner: ParticipantId,
    pub path: String,
}

impl LocationRecord {
    pub fn new(owner: ParticipantId, path: impl Into<String>) -> Self {
        Self {
            owner,
            path: path.into(),
        }
    }

    pub fn pack(&self) -> Result<Bytes, DyadError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| DyadError::Store(Status::with_message(StatusCode::SERDE_INVALID_JSON, e.to_string())))
    }

    pub fn unpack(key: &str, value: &[u8]) -> Result<Self, DyadError> {
        serde_json::from_slice(value).map_err(|e| DyadError::NotFound {
            key: key.to_string(),
            reason: format!("undecodable record: {}", e),
        })
    }
}
