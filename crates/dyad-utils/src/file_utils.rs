use std::fs::DirBuilder;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use dyad_types::{DyadCode, Result, Status};

/// Mode for directories created while staging files: rwxrwsr-x.
pub const STAGING_DIR_MODE: u32 = 0o2775;

fn fio_error(op: &str, path: &Path, err: std::io::Error) -> Status {
    Status::with_message(DyadCode::BAD_FIO, format!("{} {}: {}", op, path.display(), err))
}

/// Read an entire file into memory.
pub fn read_whole_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| fio_error("read", path, e))
}

/// Write `data` to `path`, truncating any previous content.
pub fn write_whole_file(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).map_err(|e| fio_error("write", path, e))
}

/// Create `path` and all missing parents with `mode` (ignored off unix).
pub fn create_directory_tree(path: &Path, mode: u32) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path).map_err(|e| fio_error("mkdir", path, e))
}

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Stage `data` at `path`: parents are created, the bytes go to a hidden
/// sibling first and are renamed into place, so readers never see a
/// partially written file.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    stage_with(path, data, write_whole_file)
}

fn stage_with<W>(path: &Path, data: &[u8], write: W) -> Result<()>
where
    W: FnOnce(&Path, &[u8]) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    create_directory_tree(dir, STAGING_DIR_MODE)?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Status::with_message(DyadCode::BAD_FIO, format!("no file name in {}", path.display())))?;
    let tmp_path = dir.join(format!(
        ".{}.dyad-tmp.{}.{}",
        name,
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let staged = write(&tmp_path, data)
        .and_then(|()| std::fs::rename(&tmp_path, path).map_err(|e| fio_error("rename", path, e)));
    if staged.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    staged
}
