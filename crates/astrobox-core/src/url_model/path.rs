//! Containment of output paths inside the download root.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve a client-chosen sub-folder below `root`.
///
/// Backslashes count as separators and surrounding slashes are ignored. Any
/// `..`, drive prefix or absolute component yields `root` itself. The result is
/// created and its real path re-checked, so a symlink pointing outside also
/// falls back to `root`.
pub fn resolve_target_dir(root: &Path, folder: Option<&str>) -> PathBuf {
    let raw = folder.unwrap_or("").trim().replace('\\', "/");
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return root.to_path_buf();
    }

    let mut candidate = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => candidate.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return root.to_path_buf();
            }
        }
    }

    if let Err(e) = fs::create_dir_all(&candidate) {
        tracing::warn!(dir = %candidate.display(), error = %e, "cannot create target dir; using download root");
        return root.to_path_buf();
    }
    match resolve_within_root(root, &candidate) {
        Some(real) => real,
        None => root.to_path_buf(),
    }
}

/// Real path of `candidate` if it exists and lies inside `root`.
///
/// `root` must already be canonical.
pub fn resolve_within_root(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let real = fs::canonicalize(candidate).ok()?;
    real.starts_with(root).then_some(real)
}

/// Title derived from an output path: the file name without its last extension.
pub fn title_from_path(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name,
    }
}
