//! Process liveness, signalling and resource lookup.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};

/// Snapshot of a running process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_kb: u64,
    pub run_time_secs: u64,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// pid 0 and values outside pid_t would address process groups, never allow them
fn to_pid_t(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Check if a process with the given PID is alive. Zombies count as dead.
pub fn is_process_alive(pid: u32) -> bool {
    let Some(raw) = to_pid_t(pid) else {
        return false;
    };

    // signal 0 doesn't send a signal but checks if process exists
    let exists = unsafe { libc::kill(raw, 0) } == 0
        || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    if !exists {
        return false;
    }

    // An exited child we never reaped still answers kill(0)
    let sys = load_process(pid, ProcessRefreshKind::new());
    !matches!(
        sys.process(Pid::from_u32(pid)).map(|p| p.status()),
        Some(ProcessStatus::Zombie) | Some(ProcessStatus::Dead)
    )
}

/// Send a signal to a single process
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let raw = to_pid_t(pid).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {}", pid))
    })?;
    if unsafe { libc::kill(raw, signal.as_raw()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Refresh only `pid`, leaving the rest of the process table unread
fn load_process(pid: u32, kind: ProcessRefreshKind) -> System {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true, kind);
    sys
}

/// Get process info from sysinfo
pub fn get_process_info(pid: u32) -> Option<ProcessInfo> {
    let sys = load_process(pid, ProcessRefreshKind::everything());
    sys.process(Pid::from_u32(pid)).map(|p| {
        let cmd = p
            .cmd()
            .iter()
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        ProcessInfo {
            pid,
            name: p.name().to_string_lossy().to_string(),
            cpu_percent: p.cpu_usage(),
            memory_kb: p.memory() / 1024,
            run_time_secs: p.run_time(),
            command: cmd,
        }
    })
}

/// Resolve a program the way a shell would: paths are taken as-is, bare
/// names are searched on PATH.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Human-readable memory size
pub fn format_memory(kb: u64) -> String {
    if kb >= 1024 * 1024 {
        format!("{:.1}G", kb as f64 / (1024.0 * 1024.0))
    } else if kb >= 1024 {
        format!("{:.0}M", kb as f64 / 1024.0)
    } else {
        format!("{}K", kb)
    }
}
