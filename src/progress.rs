// src/progress.rs

//! Progress reporting for long-running package operations
//!
//! Commands show spinners while assembling or deploying; scripted runs and
//! tests swap in the logging implementation so nothing draws to the
//! terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::info;

/// Progress surface shared by commands
pub trait ProgressTracker: Send + Sync {
    fn set_message(&self, message: &str);
    fn finish_success(&self, message: &str);
    fn finish_error(&self, message: &str);
}

/// indicatif spinner for interactive terminals
pub struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    pub fn spinner(message: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("const template"),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }
}

impl ProgressTracker for CliProgress {
    fn set_message(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    fn finish_success(&self, message: &str) {
        self.spinner.finish_with_message(format!("✔ {message}"));
    }

    fn finish_error(&self, message: &str) {
        self.spinner.abandon_with_message(format!("✖ {message}"));
    }
}

/// Logs progress through tracing, for non-interactive runs
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{message}");
    }

    fn finish_success(&self, message: &str) {
        info!("{message}");
    }

    fn finish_error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Pick a tracker for the current terminal.
pub fn tracker(interactive: bool, message: &str) -> Box<dyn ProgressTracker> {
    if interactive {
        Box::new(CliProgress::spinner(message))
    } else {
        let progress = LogProgress;
        progress.set_message(message);
        Box::new(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_is_silent_terminal_wise() {
        let progress = LogProgress;
        progress.set_message("working");
        progress.finish_success("done");
    }

    #[test]
    fn test_tracker_selection() {
        let progress = tracker(false, "starting");
        progress.finish_success("ok");
    }
}
