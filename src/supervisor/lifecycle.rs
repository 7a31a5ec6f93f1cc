//! Start, stop, restart and status of the sync worker.

use crate::common::config::WorkerConfig;
use crate::common::debug::debug_log;
use crate::common::process::{
    get_process_info, is_process_alive, resolve_program, send_signal, ProcessInfo, Signal,
};
use crate::supervisor::lock::LockGuard;
use crate::supervisor::pidfile::{sibling_with_suffix, PidFile, PidState};
use crate::supervisor::SupervisorError;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// How a running process was brought down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Still alive after the grace period, SIGKILL sent
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub pid: u32,
    /// Previous worker that was still running and had to be terminated
    pub replaced: Option<(u32, Termination)>,
    /// A PID file pointing at nothing was cleaned up
    pub removed_stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No PID file; no signals sent
    NotRunning,
    /// PID file named a dead process (or no pid at all); file removed
    AlreadyStopped { pid: Option<u32> },
    Stopped { pid: u32, termination: Termination },
}

#[derive(Debug, Clone)]
pub enum WorkerStatus {
    NotRunning,
    /// PID file present but nothing alive behind it
    Stale { pid: Option<u32> },
    Running { pid: u32, info: Option<ProcessInfo> },
}

pub struct Supervisor {
    config: WorkerConfig,
    pid_file: PidFile,
}

impl Supervisor {
    pub fn new(config: WorkerConfig) -> Self {
        let pid_file = PidFile::new(config.pid_file.clone());
        Self { config, pid_file }
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    fn lock_path(&self) -> PathBuf {
        sibling_with_suffix(self.pid_file.path(), ".lock")
    }

    /// Launch the worker, terminating any live predecessor first
    pub fn start(&self) -> Result<StartOutcome> {
        let program = self.check_preconditions()?;
        let _lock = LockGuard::acquire(&self.lock_path())?;
        self.start_locked(&program)
    }

    pub fn stop(&self) -> Result<StopOutcome> {
        let _lock = LockGuard::acquire(&self.lock_path())?;
        self.stop_locked()
    }

    /// Stop then start under a single lock
    pub fn restart(&self) -> Result<(StopOutcome, StartOutcome)> {
        let program = self.check_preconditions()?;
        let _lock = LockGuard::acquire(&self.lock_path())?;
        let stopped = self.stop_locked()?;
        let started = self.start_locked(&program)?;
        Ok((stopped, started))
    }

    /// Read-only view of the worker; never modifies the PID file
    pub fn status(&self) -> Result<WorkerStatus> {
        let state = self
            .pid_file
            .read()
            .with_context(|| format!("Failed to read {}", self.pid_file.path().display()))?;
        Ok(match state {
            PidState::Missing => WorkerStatus::NotRunning,
            PidState::Unreadable(_) => WorkerStatus::Stale { pid: None },
            PidState::Recorded(pid) if is_process_alive(pid) => WorkerStatus::Running {
                pid,
                info: get_process_info(pid),
            },
            PidState::Recorded(pid) => WorkerStatus::Stale { pid: Some(pid) },
        })
    }

    fn check_preconditions(&self) -> Result<PathBuf, SupervisorError> {
        let program = resolve_program(&self.config.command)
            .ok_or_else(|| SupervisorError::ProgramNotFound(self.config.command.clone()))?;
        if let Some(cwd) = &self.config.cwd {
            if !cwd.is_dir() {
                return Err(SupervisorError::MissingWorkingDir(cwd.clone()));
            }
        }
        Ok(program)
    }

    fn start_locked(&self, program: &Path) -> Result<StartOutcome> {
        let mut replaced = None;
        let mut removed_stale = false;

        match self.pid_file.read()? {
            PidState::Recorded(pid) if is_process_alive(pid) => {
                debug_log(&format!("worker {} still running, terminating before start", pid));
                replaced = Some((pid, self.terminate(pid)?));
            }
            PidState::Recorded(_) | PidState::Unreadable(_) => removed_stale = true,
            PidState::Missing => {}
        }
        self.pid_file.remove()?;

        let pid = self.spawn_worker(program)?;
        self.pid_file
            .write(pid)
            .with_context(|| {
                format!("Failed to write PID file {}", self.pid_file.path().display())
            })?;
        debug_log(&format!("worker started with pid {}", pid));

        Ok(StartOutcome {
            pid,
            replaced,
            removed_stale,
        })
    }

    fn stop_locked(&self) -> Result<StopOutcome> {
        let outcome = match self.pid_file.read()? {
            PidState::Missing => return Ok(StopOutcome::NotRunning),
            PidState::Unreadable(content) => {
                debug_log(&format!("PID file holds {:?}, treating as stale", content));
                StopOutcome::AlreadyStopped { pid: None }
            }
            PidState::Recorded(pid) if !is_process_alive(pid) => {
                StopOutcome::AlreadyStopped { pid: Some(pid) }
            }
            PidState::Recorded(pid) => StopOutcome::Stopped {
                pid,
                termination: self.terminate(pid)?,
            },
        };
        self.pid_file.remove()?;
        Ok(outcome)
    }

    /// SIGTERM, wait out the grace period, SIGKILL if still alive
    fn terminate(&self, pid: u32) -> Result<Termination> {
        if let Err(e) = send_signal(pid, Signal::Terminate) {
            // Exited between the liveness check and the signal
            if e.raw_os_error() == Some(libc::ESRCH) {
                return Ok(Termination::Graceful);
            }
            return Err(e).with_context(|| format!("Failed to send SIGTERM to {}", pid));
        }

        if wait_for_exit(pid, self.config.grace_period()) {
            return Ok(Termination::Graceful);
        }

        debug_log(&format!("worker {} ignored SIGTERM, sending SIGKILL", pid));
        match send_signal(pid, Signal::Kill) {
            Err(e) if e.raw_os_error() != Some(libc::ESRCH) => {
                return Err(e).with_context(|| format!("Failed to send SIGKILL to {}", pid));
            }
            _ => {}
        }
        wait_for_exit(pid, self.config.grace_period());
        Ok(Termination::Forced)
    }

    fn spawn_worker(&self, program: &Path) -> Result<u32> {
        let log_path = &self.config.log_file;
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open worker log {}", log_path.display()))?;
        writeln!(
            log,
            "[{}] osa-ops: starting {} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            program.display(),
            self.config.args.join(" ")
        )?;

        let mut cmd = Command::new(program);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        // New session: the worker outlives the controlling terminal
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to launch {}", program.display()))?;
        Ok(child.id())
    }
}

/// Poll until the process is gone or the timeout elapses. True if it exited.
fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(LIVENESS_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn worker_config(dir: &Path, command: &str, args: &[&str]) -> WorkerConfig {
        WorkerConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            env: HashMap::new(),
            pid_file: dir.join("auto_sync.pid"),
            log_file: dir.join("logs").join("auto_sync.log"),
            grace_period_ms: 300,
        }
    }

    fn sleeper(dir: &Path) -> Supervisor {
        Supervisor::new(worker_config(dir, "sleep", &["30"]))
    }

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    fn recorded_pid(supervisor: &Supervisor) -> u32 {
        match supervisor.pid_file().read().unwrap() {
            PidState::Recorded(pid) => pid,
            other => panic!("expected a recorded pid, got {other:?}"),
        }
    }

    #[test]
    fn test_start_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());

        let outcome = supervisor.start().unwrap();
        assert_eq!(outcome.replaced, None);
        assert!(!outcome.removed_stale);
        assert_eq!(recorded_pid(&supervisor), outcome.pid);
        assert!(is_process_alive(outcome.pid));
        assert!(!dir.path().join("auto_sync.pid.lock").exists());
        assert!(dir.path().join("logs").join("auto_sync.log").exists());

        supervisor.stop().unwrap();
    }

    #[test]
    fn test_start_with_stale_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        supervisor.pid_file().write(dead_pid()).unwrap();

        let outcome = supervisor.start().unwrap();
        assert!(outcome.removed_stale);
        assert_eq!(outcome.replaced, None);
        assert_eq!(recorded_pid(&supervisor), outcome.pid);
        assert!(is_process_alive(outcome.pid));

        supervisor.stop().unwrap();
    }

    #[test]
    fn test_start_replaces_running_worker() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());

        let first = supervisor.start().unwrap();
        let second = supervisor.start().unwrap();
        assert_ne!(first.pid, second.pid);
        assert_eq!(second.replaced, Some((first.pid, Termination::Graceful)));
        assert!(!is_process_alive(first.pid));
        assert!(is_process_alive(second.pid));
        assert_eq!(recorded_pid(&supervisor), second.pid);

        supervisor.stop().unwrap();
    }

    #[test]
    fn test_stop_without_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
        assert!(!supervisor.pid_file().path().exists());
    }

    #[test]
    fn test_stop_live_worker() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        let started = supervisor.start().unwrap();

        let outcome = supervisor.stop().unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pid: started.pid,
                termination: Termination::Graceful
            }
        );
        assert!(!supervisor.pid_file().path().exists());
        assert!(!is_process_alive(started.pid));
    }

    #[test]
    fn test_stop_escalates_when_sigterm_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(worker_config(
            dir.path(),
            "sh",
            &["-c", "trap '' TERM; exec sleep 30"],
        ));
        let started = supervisor.start().unwrap();
        // Let the shell install its trap before signalling
        thread::sleep(Duration::from_millis(300));

        let outcome = supervisor.stop().unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pid: started.pid,
                termination: Termination::Forced
            }
        );
        assert!(!is_process_alive(started.pid));
        assert!(!supervisor.pid_file().path().exists());
    }

    #[test]
    fn test_stop_with_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        let pid = dead_pid();
        supervisor.pid_file().write(pid).unwrap();

        assert_eq!(
            supervisor.stop().unwrap(),
            StopOutcome::AlreadyStopped { pid: Some(pid) }
        );
        assert!(!supervisor.pid_file().path().exists());
    }

    #[test]
    fn test_stop_with_garbage_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        fs::write(supervisor.pid_file().path(), "garbage").unwrap();

        assert_eq!(
            supervisor.stop().unwrap(),
            StopOutcome::AlreadyStopped { pid: None }
        );
        assert!(!supervisor.pid_file().path().exists());
    }

    #[test]
    fn test_restart() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        let first = supervisor.start().unwrap();

        let (stopped, started) = supervisor.restart().unwrap();
        assert_eq!(
            stopped,
            StopOutcome::Stopped {
                pid: first.pid,
                termination: Termination::Graceful
            }
        );
        assert_eq!(started.replaced, None);
        assert!(!is_process_alive(first.pid));
        assert_eq!(recorded_pid(&supervisor), started.pid);

        supervisor.stop().unwrap();
    }

    #[test]
    fn test_status() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        assert!(matches!(supervisor.status().unwrap(), WorkerStatus::NotRunning));

        let started = supervisor.start().unwrap();
        match supervisor.status().unwrap() {
            WorkerStatus::Running { pid, .. } => assert_eq!(pid, started.pid),
            other => panic!("expected running, got {other:?}"),
        }

        supervisor.stop().unwrap();
        let pid = dead_pid();
        supervisor.pid_file().write(pid).unwrap();
        assert!(matches!(
            supervisor.status().unwrap(),
            WorkerStatus::Stale { pid: Some(p) } if p == pid
        ));
        // Status is read-only
        assert!(supervisor.pid_file().path().exists());
    }

    #[test]
    fn test_missing_program_fails_before_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(worker_config(dir.path(), "no-such-interpreter-xyz", &[]));

        let err = supervisor.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SupervisorError>(),
            Some(SupervisorError::ProgramNotFound(_))
        ));
        assert!(!supervisor.pid_file().path().exists());
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_missing_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = worker_config(dir.path(), "sleep", &["30"]);
        config.cwd = Some(dir.path().join("backend"));
        let err = Supervisor::new(config).start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SupervisorError>(),
            Some(SupervisorError::MissingWorkingDir(_))
        ));
    }

    #[test]
    fn test_start_refused_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = sleeper(dir.path());
        let mut holder = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(dir.path().join("auto_sync.pid.lock"), holder.id().to_string()).unwrap();

        let err = supervisor.start().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SupervisorError>(),
            Some(SupervisorError::Locked { .. })
        ));
        assert!(!supervisor.pid_file().path().exists());

        holder.kill().unwrap();
        holder.wait().unwrap();
    }

    #[test]
    fn test_worker_env_and_output_reach_log() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo interval=$SYNC_INTERVAL; exec sleep 30";
        let mut config = worker_config(dir.path(), "sh", &["-c", script]);
        config.env.insert("SYNC_INTERVAL".to_string(), "60".to_string());
        let supervisor = Supervisor::new(config);

        supervisor.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        supervisor.stop().unwrap();

        let log = fs::read_to_string(dir.path().join("logs").join("auto_sync.log")).unwrap();
        assert!(log.contains("osa-ops: starting"));
        assert!(log.contains("interval=60"));
    }
}
