use std::io::BufRead;
use std::path::Path;

use dyad_types::{Result, Status, StatusCode};
use dyad_utils::normalize_path;

use crate::entry::StorageEntry;

/// Mount table of the running process.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

const INITIAL_CAPACITY: usize = 8;

/// Filesystem types backed by node-local devices.
const LOCAL_TYPES: &[&str] = &["ext2", "ext3", "ext4", "xfs", "gfs2", "ramfs", "tmpfs", "dax"];

/// Filesystem types shared across nodes.
const REMOTE_TYPES: &[&str] = &["nfs", "nfs4", "lustre", "gpfs"];

fn classify(fs_type: &str) -> Option<bool> {
    if LOCAL_TYPES.contains(&fs_type) {
        Some(true)
    } else if REMOTE_TYPES.contains(&fs_type) {
        Some(false)
    } else {
        None
    }
}

/// Decode the `\ooo` octal escapes the kernel uses for blanks in mount
/// table fields.
fn unescape_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let v = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(v as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Local picture of which storage devices back which directories.
///
/// Built once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct StorageView {
    entries: Vec<StorageEntry>,
}

impl StorageView {
    pub fn new(entries: Vec<StorageEntry>) -> Self {
        Self { entries }
    }

    pub fn from_mounts() -> Result<Self> {
        let file = std::fs::File::open(PROC_MOUNTS)
            .map_err(|e| Status::with_message(StatusCode::IO_ERROR, format!("{}: {}", PROC_MOUNTS, e)))?;
        Self::from_mount_table(std::io::BufReader::new(file))
    }

    /// Build from any reader in mount table format
    /// (`fsname dir type opts freq passno`). Lines whose filesystem type is
    /// neither local nor remote storage are skipped.
    pub fn from_mount_table<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = Vec::with_capacity(INITIAL_CAPACITY);
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(fsname), Some(dir), Some(fs_type)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(Status::with_message(
                    StatusCode::INVALID_FORMAT,
                    format!("malformed mount entry: {}", line),
                ));
            };
            let Some(is_local) = classify(fs_type) else {
                continue;
            };
            entries.push(StorageEntry::new(unescape_field(dir), unescape_field(fsname), is_local));
        }
        entries.shrink_to_fit();
        tracing::debug!(devices = entries.len(), "storage view built");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[StorageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry of the mount closest to `path`. Mount points match on whole
    /// path components; a path under no known mount gets
    /// [`StorageEntry::unknown`].
    pub fn check_if_local_storage(&self, path: &Path) -> StorageEntry {
        let path = normalize_path(path);
        self.entries
            .iter()
            .filter(|e| !e.mount_point.is_empty() && path.starts_with(&e.mount_point))
            .max_by_key(|e| Path::new(&e.mount_point).components().count())
            .cloned()
            .unwrap_or_else(StorageEntry::unknown)
    }

    pub fn is_local_storage(&self, path: &Path) -> bool {
        self.check_if_local_storage(path).is_local
    }
}
