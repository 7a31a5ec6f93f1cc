//! Debug logging to a timestamped file under the user's cache directory.

use chrono::{Local, Utc};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

static DEBUG_LOG: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Initialize debug logging. Only the first call takes effect.
pub fn init_debug(enabled: bool) {
    let path = if enabled { debug_log_path() } else { None };
    if let Some(path) = &path {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                writeln!(
                    file,
                    "=== osa-ops (pid {}) debug log started at {} ===",
                    std::process::id(),
                    Utc::now()
                )
            });
    }
    let _ = DEBUG_LOG.set(path);
}

/// Default location of the debug log
pub fn debug_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|c| c.join("osa-ops").join("debug.log"))
}

/// Append a line to the debug log if enabled
pub fn debug_log(msg: &str) {
    let Some(Some(path)) = DEBUG_LOG.get() else {
        return;
    };
    if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let _ = writeln!(file, "[{}] {}", timestamp, msg);
    }
}

/// Operator-facing warning: always printed to stderr, mirrored to the debug log
pub fn warn(msg: &str) {
    eprintln!("warning: {}", msg);
    debug_log(&format!("WARN {}", msg));
}

/// Operator-facing message on stderr, mirrored to the debug log
pub fn info(msg: &str) {
    eprintln!("{}", msg);
    debug_log(msg);
}
