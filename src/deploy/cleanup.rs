//! Removal of known-obsolete files from a deployed tree.

use crate::common::config::CleanupConfig;
use crate::common::debug::debug_log;
use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Every file whose name matched, in walk order
    pub matched: Vec<PathBuf>,
    pub removed: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Delete (or with `dry_run`, only list) files under the root whose name
/// matches one of the patterns. Directories are never removed.
pub fn cleanup(config: &CleanupConfig, dry_run: bool) -> Result<CleanupReport> {
    if !config.root.is_dir() {
        bail!("Cleanup root does not exist: {}", config.root.display());
    }
    let patterns = config
        .patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid cleanup pattern {:?}", p)))
        .collect::<Result<Vec<_>>>()?;

    let mut report = CleanupReport::default();
    if patterns.is_empty() {
        return Ok(report);
    }

    for entry in WalkDir::new(&config.root).sort_by_file_name() {
        // An unreadable directory may hide matches, so it counts as a failure
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(&config.root).to_path_buf();
                debug_log(&format!("cleanup walk error at {}: {}", path.display(), e));
                report.failed.push((path, e.to_string()));
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !patterns.iter().any(|p| p.matches(&name)) {
            continue;
        }

        let path = entry.into_path();
        if !dry_run {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug_log(&format!("removed {}", path.display()));
                    report.removed += 1;
                }
                Err(e) => report.failed.push((path.clone(), e.to_string())),
            }
        }
        report.matched.push(path);
    }

    Ok(report)
}
