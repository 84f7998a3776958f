//! Desktop notifications at the end of a run
//!
//! Uses whichever notifier the platform offers on `PATH`. Notifications are
//! best effort: a missing or failing notifier is logged, never an error.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::RunOptions;

#[derive(Debug, Clone)]
enum Backend {
    NotifySend(PathBuf),
    AppleScript(PathBuf),
}

/// Sends a single notification summarizing a run
#[derive(Debug, Clone)]
pub struct Notifier {
    backend: Option<Backend>,
}

impl Notifier {
    /// Notifier for this run, or `None` when notifications are disabled or
    /// no notifier is installed
    pub fn for_run(options: &RunOptions) -> Option<Self> {
        options
            .notifications_enabled()
            .then(Self::detect)
            .filter(Self::is_available)
    }

    fn detect() -> Self {
        let backend = which::which("notify-send")
            .map(Backend::NotifySend)
            .or_else(|_| which::which("osascript").map(Backend::AppleScript))
            .ok();
        if backend.is_none() {
            debug!("no desktop notifier found on PATH");
        }
        Self { backend }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn send(&self, title: &str, message: &str) {
        let Some(backend) = &self.backend else {
            return;
        };

        let mut command = match backend {
            Backend::NotifySend(path) => {
                let mut command = Command::new(path);
                command.arg(title).arg(message);
                command
            }
            Backend::AppleScript(path) => {
                let mut command = Command::new(path);
                command.arg("-e").arg(format!(
                    "display notification {} with title {}",
                    quote(message),
                    quote(title)
                ));
                command
            }
        };

        let status = command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => warn!(%status, "desktop notification failed"),
            Err(e) => warn!(error = %e, "desktop notification failed"),
        }
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_in_ci() {
        let options = RunOptions {
            notify: true,
            ci: true,
            ..Default::default()
        };
        assert!(Notifier::for_run(&options).is_none());
    }

    #[test]
    fn test_disabled_without_flag() {
        assert!(Notifier::for_run(&RunOptions::default()).is_none());
    }

    #[test]
    fn test_applescript_quoting() {
        assert_eq!(quote(r#"say "hi""#), r#""say \"hi\"""#);
    }

    #[test]
    fn test_enabled_only_with_a_backend() {
        let options = RunOptions {
            notify: true,
            ci: false,
            ..Default::default()
        };
        let expected = which::which("notify-send").is_ok() || which::which("osascript").is_ok();
        assert_eq!(Notifier::for_run(&options).is_some(), expected);
    }

    #[tokio::test]
    async fn test_send_without_backend_is_silent() {
        let notifier = Notifier { backend: None };
        assert!(!notifier.is_available());
        notifier.send("tasktree", "done").await;
    }
}
