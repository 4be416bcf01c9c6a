//! User-visible status messages during shutdown.
//!
//! Every message goes to the log. It is additionally echoed to the boot
//! splash surfaces that exist on this machine; a missing surface is skipped
//! and a failing one is ignored.

use crate::config::NotifyConfig;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::Level;

pub const PROGRESS_MESSAGE: &str =
    "Unattended-upgrade in progress during shutdown, please don't turn off the computer";
pub const SHUTDOWN_MODE_MESSAGE: &str = "Running unattended-upgrades in shutdown mode";
pub const ALL_INSTALLED_MESSAGE: &str = "All upgrades installed";
pub const STOPPED_MESSAGE: &str =
    "Unattended-upgrades stopped. There may be upgrades left to be installed in the next run.";

/// Whether a sink actually showed the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Delivered,
    Skipped,
}

/// An optional text surface such as a boot splash.
pub trait NotificationSink {
    fn name(&self) -> &'static str;
    fn try_notify(&self, message: &str) -> SinkOutcome;
}

/// Where coordinator status messages go.
pub trait Notify {
    fn notify(&self, message: &str, level: Level);

    /// Show the "please wait" banner plus the upgrade's own progress text.
    fn notify_progress(&self);
}

/// Run a sink binary, swallowing every failure.
fn run_quietly(binary: &Path, args: &[&str]) {
    match Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => {
            tracing::debug!(binary = %binary.display(), exit_code = ?status.code(), "notification command failed");
        }
        Err(e) => {
            tracing::debug!(binary = %binary.display(), error = %e, "failed to run notification command");
        }
    }
}

/// `plymouth message --text`, one call per line.
#[derive(Debug, Clone)]
pub struct PlymouthSink {
    binary: PathBuf,
}

impl PlymouthSink {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl NotificationSink for PlymouthSink {
    fn name(&self) -> &'static str {
        "plymouth"
    }

    fn try_notify(&self, message: &str) -> SinkOutcome {
        if !self.binary.exists() {
            return SinkOutcome::Skipped;
        }
        for line in message.lines() {
            tracing::debug!(binary = %self.binary.display(), "running plymouth --text");
            run_quietly(&self.binary, &["message", "--text", line]);
        }
        SinkOutcome::Delivered
    }
}

/// `usplash_write TEXT`, followed by `PULSATE` to keep the bar moving.
#[derive(Debug, Clone)]
pub struct UsplashSink {
    binary: PathBuf,
}

impl UsplashSink {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl NotificationSink for UsplashSink {
    fn name(&self) -> &'static str {
        "usplash"
    }

    fn try_notify(&self, message: &str) -> SinkOutcome {
        if !self.binary.exists() {
            return SinkOutcome::Skipped;
        }
        tracing::debug!(binary = %self.binary.display(), "running usplash_write");
        run_quietly(&self.binary, &["TEXT", message]);
        run_quietly(&self.binary, &["PULSATE"]);
        SinkOutcome::Delivered
    }
}

/// Logs messages and fans them out to every configured sink.
pub struct Notifier {
    sinks: Vec<Box<dyn NotificationSink>>,
    progress_file: PathBuf,
}

impl Notifier {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>, progress_file: impl Into<PathBuf>) -> Self {
        Self {
            sinks,
            progress_file: progress_file.into(),
        }
    }

    /// The standard sinks: plymouth, then usplash.
    pub fn from_config(config: &NotifyConfig, progress_file: impl Into<PathBuf>) -> Self {
        Self::new(
            vec![
                Box::new(PlymouthSink::new(&config.plymouth)),
                Box::new(UsplashSink::new(&config.usplash)),
            ],
            progress_file,
        )
    }

    /// Compose the progress banner from the fixed text and the progress file.
    pub fn progress_message(&self) -> String {
        let mut message = PROGRESS_MESSAGE.to_string();
        match std::fs::read_to_string(&self.progress_file) {
            Ok(progress) if !progress.trim().is_empty() => {
                message.push('\n');
                message.push_str(progress.trim());
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %self.progress_file.display(), error = %e, "failed to read progress file");
            }
        }
        message
    }
}

impl Notify for Notifier {
    fn notify(&self, message: &str, level: Level) {
        match level {
            Level::ERROR => tracing::error!("{message}"),
            Level::WARN => tracing::warn!("{message}"),
            Level::INFO => tracing::info!("{message}"),
            Level::DEBUG => tracing::debug!("{message}"),
            _ => tracing::trace!("{message}"),
        }
        for sink in &self.sinks {
            if sink.try_notify(message) == SinkOutcome::Skipped {
                tracing::trace!(sink = sink.name(), "notification surface not present");
            }
        }
    }

    fn notify_progress(&self) {
        self.notify(&self.progress_message(), Level::WARN);
    }
}
