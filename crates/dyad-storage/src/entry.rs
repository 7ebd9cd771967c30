use dyad_types::{Result, Status, StatusCode};
use serde::{Deserialize, Serialize};

/// One mounted storage device.
///
/// Serialized as the compact array `[mount_point, device_name, is_local]`,
/// which is also how it travels inside a fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, bool)", into = "(String, String, bool)")]
pub struct StorageEntry {
    pub mount_point: String,
    pub device_name: String,
    pub is_local: bool,
}

impl StorageEntry {
    pub fn new(mount_point: impl Into<String>, device_name: impl Into<String>, is_local: bool) -> Self {
        Self {
            mount_point: mount_point.into(),
            device_name: device_name.into(),
            is_local,
        }
    }

    /// Stand-in for a path no known mount covers.
    pub fn unknown() -> Self {
        Self::new("", "", true)
    }

    pub fn is_unknown(&self) -> bool {
        self.mount_point.is_empty() && self.device_name.is_empty()
    }

    /// Whether both entries name the same network device, so a consumer can
    /// read the producer's file where it is. Local devices with the same name
    /// on two nodes are still two devices.
    pub fn same_device(&self, other: &StorageEntry) -> bool {
        !self.is_local
            && !other.is_local
            && !self.device_name.is_empty()
            && self.device_name == other.device_name
    }
}

impl From<(String, String, bool)> for StorageEntry {
    fn from((mount_point, device_name, is_local): (String, String, bool)) -> Self {
        Self {
            mount_point,
            device_name,
            is_local,
        }
    }
}

impl From<StorageEntry> for (String, String, bool) {
    fn from(e: StorageEntry) -> Self {
        (e.mount_point, e.device_name, e.is_local)
    }
}

pub fn pack_storage_entry(entry: &StorageEntry) -> Result<String> {
    serde_json::to_string(entry)
        .map_err(|e| Status::with_message(StatusCode::SERDE_INVALID_JSON, e.to_string()))
}

pub fn unpack_storage_entry(packed: &str) -> Result<StorageEntry> {
    serde_json::from_str(packed)
        .map_err(|e| Status::with_message(StatusCode::SERDE_INVALID_JSON, e.to_string()))
}
