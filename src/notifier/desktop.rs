//! Platform-native display of CRM notifications.

use crate::common::process::resolve_program;
use crate::notifier::messages::Notification;
use std::process::Command;

const TITLE: &str = "OsaGaming CRM";

/// Raise a desktop notification. Returns false when no notifier is available.
pub fn show(notification: &Notification) -> bool {
    let message = format_line(notification);

    #[cfg(target_os = "macos")]
    {
        if notify_macos(TITLE, &message) {
            return true;
        }
    }

    #[cfg(target_os = "linux")]
    {
        if notify_linux(TITLE, &message, urgency(notification.kind())) {
            return true;
        }
    }

    let _ = message;
    false
}

/// `[warn] New chat`
pub fn format_line(notification: &Notification) -> String {
    format!("[{}] {}", notification.kind(), notification.message)
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn urgency(kind: &str) -> &'static str {
    match kind {
        "error" | "danger" => "critical",
        "warn" | "warning" => "normal",
        _ => "low",
    }
}

/// Quote text as an AppleScript string literal
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn applescript_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg_attr(not(any(target_os = "macos", target_os = "linux")), allow(dead_code))]
fn run_quietly(command: &mut Command) -> bool {
    command
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(target_os = "macos")]
fn notify_macos(title: &str, message: &str) -> bool {
    let script = format!(
        "display notification {} with title {}",
        applescript_string(message),
        applescript_string(title)
    );
    run_quietly(Command::new("osascript").args(["-e", &script]))
}

#[cfg(target_os = "linux")]
fn notify_linux(title: &str, message: &str, urgency: &str) -> bool {
    run_quietly(Command::new("notify-send").args(["--urgency", urgency, title, message]))
}

/// osascript ships with macOS; elsewhere notify-send must be on PATH
pub fn is_available() -> bool {
    if cfg!(target_os = "macos") {
        return true;
    }
    cfg!(target_os = "linux") && resolve_program("notify-send").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        assert_eq!(format_line(&Notification::new("New chat", "warn")), "[warn] New chat");
    }

    #[test]
    fn test_applescript_string_escapes_quotes() {
        assert_eq!(applescript_string("plain"), "\"plain\"");
        assert_eq!(
            applescript_string(r#"say "hi" \ bye"#),
            r#""say \"hi\" \\ bye""#
        );
    }

    #[test]
    fn test_availability_follows_path_lookup() {
        if cfg!(target_os = "linux") {
            assert_eq!(is_available(), resolve_program("notify-send").is_some());
        }
    }

    #[test]
    fn test_urgency() {
        assert_eq!(urgency("error"), "critical");
        assert_eq!(urgency("warn"), "normal");
        assert_eq!(urgency("info"), "low");
    }
}
