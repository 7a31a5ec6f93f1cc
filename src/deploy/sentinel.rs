//! Restart sentinel: the application server reloads when this file's mtime changes.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::time::SystemTime;

/// Create the sentinel if needed and bump its modification time to now.
/// Returns true if the file had to be created.
pub fn touch(path: &Path) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let created = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open sentinel {}", path.display()))?;
    file.set_modified(SystemTime::now())
        .with_context(|| format!("Failed to update mtime of {}", path.display()))?;
    Ok(created)
}
