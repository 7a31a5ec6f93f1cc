//! Lock file serializing supervisor commands.
//!
//! The lock is taken with create-if-absent semantics, so two controllers
//! racing to start the worker cannot both proceed. The file records the
//! holder's pid; a lock whose holder has died is reclaimed.

use crate::common::debug::debug_log;
use crate::common::process::is_process_alive;
use crate::supervisor::pidfile::sibling_with_suffix;
use crate::supervisor::SupervisorError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// A lock without a readable pid is only abandoned once it is this old.
/// Younger ones may belong to a peer that has not written its pid yet.
const UNWRITTEN_LOCK_GRACE: Duration = Duration::from_secs(5);

const ACQUIRE_ATTEMPTS: usize = 3;

/// Held lock; released when dropped
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire(path: &Path) -> Result<Self, SupervisorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let me = std::process::id();

        for _ in 0..ACQUIRE_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    writeln!(file, "{}", me)?;
                    debug_log(&format!("acquired lock {}", path.display()));
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let Some(existing) = ExistingLock::observe(path)? else {
                        continue;
                    };
                    match existing.holder {
                        Some(pid) if pid == me || is_process_alive(pid) => {
                            return Err(locked(path, Some(pid)));
                        }
                        None if !existing.is_abandoned() => return Err(locked(path, None)),
                        _ => {}
                    }
                    debug_log(&format!(
                        "reclaiming stale lock {} (holder {:?})",
                        path.display(),
                        existing.holder
                    ));
                    if !reclaim(path, &existing)? {
                        return Err(locked(path, read_holder(path)));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(locked(path, read_holder(path)))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if read_holder(&self.path) != Some(std::process::id()) {
            debug_log(&format!("lock {} is no longer ours, leaving it", self.path.display()));
            return;
        }
        let _ = fs::remove_file(&self.path);
        debug_log(&format!("released lock {}", self.path.display()));
    }
}

/// A lock file as seen by a controller that failed to create it
#[derive(Debug)]
struct ExistingLock {
    holder: Option<u32>,
    dev: u64,
    ino: u64,
    modified: Option<SystemTime>,
}

impl ExistingLock {
    /// `None` when the file vanished before it could be opened
    fn observe(path: &Path) -> io::Result<Option<Self>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta = file.metadata()?;
        let mut content = String::new();
        // Non-UTF-8 content is treated like an unwritten pid
        let _ = file.read_to_string(&mut content);
        Ok(Some(Self {
            holder: parse_holder(&content),
            dev: meta.dev(),
            ino: meta.ino(),
            modified: meta.modified().ok(),
        }))
    }

    fn is_abandoned(&self) -> bool {
        self.modified
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .is_some_and(|age| age >= UNWRITTEN_LOCK_GRACE)
    }

    /// Inode numbers are reused once a file is deleted, so the holder and
    /// mtime must match as well
    fn is_same_lock(&self, other: &ExistingLock) -> bool {
        self.dev == other.dev
            && self.ino == other.ino
            && self.modified == other.modified
            && self.holder == other.holder
    }
}

/// Move a stale lock aside and delete it. If what got moved is not the file
/// that was judged stale, a peer replaced it in between: it is linked back
/// into place and `false` is returned. `true` means the path is free to
/// retry.
fn reclaim(path: &Path, stale: &ExistingLock) -> io::Result<bool> {
    let aside = sibling_with_suffix(path, &format!(".stale.{}", std::process::id()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    }

    let Some(moved) = ExistingLock::observe(&aside)? else {
        return Ok(true);
    };
    if stale.is_same_lock(&moved) {
        fs::remove_file(&aside)?;
        return Ok(true);
    }

    // hard_link never overwrites, so a lock created meanwhile is kept
    if let Err(e) = fs::hard_link(&aside, path) {
        debug_log(&format!("could not restore lock {}: {}", path.display(), e));
    }
    fs::remove_file(&aside)?;
    Ok(false)
}

fn locked(path: &Path, holder: Option<u32>) -> SupervisorError {
    SupervisorError::Locked {
        path: path.to_path_buf(),
        holder,
    }
}

fn parse_holder(content: &str) -> Option<u32> {
    content.trim().parse().ok().filter(|pid| *pid != 0)
}

fn read_holder(path: &Path) -> Option<u32> {
    parse_holder(&fs::read_to_string(path).ok()?)
}
