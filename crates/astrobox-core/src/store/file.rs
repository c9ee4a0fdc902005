//! Reading and atomically replacing the history file.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use super::types::StoreData;

/// Missing or empty file: empty data. Unparseable file: warn and start empty.
pub(super) fn read_data(path: &Path) -> Result<StoreData> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreData::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("read history: {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(StoreData::default());
    }
    match serde_json::from_str(&raw) {
        Ok(data) => Ok(data),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "history file is corrupt; starting empty");
            Ok(StoreData::default())
        }
    }
}

/// Write `contents` to a temp file beside `path`, then rename it into place.
pub(super) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace history: {}", path.display()))?;
    Ok(())
}
