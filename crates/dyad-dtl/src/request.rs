use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use dyad_storage::StorageEntry;
use dyad_types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{DtlError, DtlResult};

/// Topic producers serve fetches under.
pub const FETCH_TOPIC: &str = "dyad.fetch";

/// Where the producer should send an out-of-band payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmaInfo {
    pub tag: u64,
    /// Fetch number on this tag. The payload carries it back so a late
    /// payload of an abandoned fetch is never taken for a newer one.
    pub seq: u64,
    /// Base64 of the consumer worker's opaque address.
    pub address: String,
}

impl RmaInfo {
    pub fn new(tag: u64, seq: u64, address: &[u8]) -> Self {
        Self {
            tag,
            seq,
            address: STANDARD.encode(address),
        }
    }

    pub fn worker_address(&self) -> DtlResult<Address> {
        let raw = STANDARD
            .decode(&self.address)
            .map_err(|e| DtlError::PackFail(format!("worker address: {}", e)))?;
        Address::from_bytes(&raw)
            .ok_or_else(|| DtlError::PackFail(format!("worker address of {} bytes", raw.len())))
    }
}

/// Body of a `dyad.fetch` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Path relative to the managed root.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rma: Option<RmaInfo>,
    /// Consumer's storage entry for the file, for the shared-device check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageEntry>,
}

impl FetchRequest {
    pub fn pack(&self) -> DtlResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| DtlError::PackFail(e.to_string()))
    }

    pub fn unpack(payload: &[u8]) -> DtlResult<Self> {
        let req: FetchRequest =
            serde_json::from_slice(payload).map_err(|e| DtlError::PackFail(e.to_string()))?;
        if req.path.is_empty() {
            return Err(DtlError::PackFail("empty path".to_string()));
        }
        Ok(req)
    }
}

/// First response of an RMA fetch: what to expect on the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmaAck {
    pub payload_size: u64,
    pub tag: u64,
    pub seq: u64,
    pub address: String,
}

impl RmaAck {
    pub fn pack(&self) -> DtlResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| DtlError::PackFail(e.to_string()))
    }

    pub fn unpack(body: &[u8]) -> DtlResult<Self> {
        serde_json::from_slice(body).map_err(|e| DtlError::PackFail(format!("ack: {}", e)))
    }
}
