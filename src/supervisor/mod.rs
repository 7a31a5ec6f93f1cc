//! Lifecycle management for the background sync worker.

pub mod lifecycle;
pub mod lock;
pub mod pidfile;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("worker program not found: {0}")]
    ProgramNotFound(String),
    #[error("worker directory does not exist: {}", .0.display())]
    MissingWorkingDir(PathBuf),
    #[error(
        "another osa-ops{} holds {}",
        .holder.map(|pid| format!(" (pid {pid})")).unwrap_or_default(),
        .path.display()
    )]
    Locked { path: PathBuf, holder: Option<u32> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
