//! PID file persistence.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What a PID file currently says
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidState {
    /// No PID file on disk
    Missing,
    /// A parseable pid (not necessarily alive)
    Recorded(u32),
    /// The file exists but does not hold a pid
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> io::Result<PidState> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(match content.trim().parse::<u32>() {
                Ok(pid) if pid > 0 => PidState::Recorded(pid),
                _ => PidState::Unreadable(content.trim().to_string()),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PidState::Missing),
            Err(e) => Err(e),
        }
    }

    /// Replace the recorded pid. Readers see either the old or the new file.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = sibling_with_suffix(&self.path, ".tmp");
        fs::write(&tmp, format!("{}\n", pid))?;
        fs::rename(&tmp, &self.path)
    }

    /// Remove the file; an already-absent file is not an error
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// `foo.pid` -> `foo.pid<suffix>`
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
