use std::path::{Component, Path, PathBuf};

/// Normalize a path by resolving `.` and `..` components without filesystem access.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }
    components.iter().collect()
}

/// Path of `path` relative to the managed `root`, as a `/`-separated string.
///
/// Returns `None` when `path` is not strictly below `root`. The comparison is
/// done on normalized components first; when that fails and both exist on
/// disk, their canonical forms are compared as well so that symlinked roots
/// still match.
pub fn managed_relative_path(root: &Path, path: &Path) -> Option<String> {
    if root.as_os_str().is_empty() {
        return None;
    }
    if let Some(rel) = strip_root(&normalize_path(root), &normalize_path(path)) {
        return Some(rel);
    }

    let root = root.canonicalize().ok()?;
    let path = canonicalize_existing_prefix(path)?;
    strip_root(&root, &path)
}

/// Join a relative managed path back onto a root, refusing anything that
/// would land outside of it.
pub fn resolve_under_root(root: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    if relative.is_empty() || rel.is_absolute() {
        return None;
    }
    let mut out = root.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn strip_root(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Canonicalize the longest existing ancestor and re-append the rest.
/// Consumers ask about files that do not exist yet.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in missing.iter().rev() {
                out.push(part);
            }
            return Some(out);
        }
        missing.push(existing.file_name()?.to_os_string());
        existing = existing.parent()?.to_path_buf();
    }
}
