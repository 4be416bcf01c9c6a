mod apt_config;
mod config;
mod coordinator;
mod launcher;
mod lock;
mod logging;
mod notify;
mod terminator;

use apt_config::{AptConfig, Capability};
use clap::Parser;
use config::RunConfig;
use coordinator::Coordinator;
use launcher::UpgradeLauncher;
use lock::FileLockProbe;
use notify::Notifier;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use terminator::{PidFile, SignalTerminator};

/// Exit status for operational failures (lock errors, spawn failures, ...).
const EXIT_FAILURE: u8 = 2;

/// Runs at shutdown: lets a pending unattended upgrade finish (if
/// configured) or stops it, then waits for the upgrade lock to be released.
#[derive(Parser, Debug)]
#[command(name = "unattended-upgrade-shutdown", version, about)]
pub struct Cli {
    /// Print debug output to the log
    #[arg(long)]
    debug: bool,

    /// Delay in minutes to wait for unattended-upgrades
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u64).range(1..))]
    delay: u64,

    /// Lock file location
    #[arg(long, default_value = "/var/run/unattended-upgrades.lock")]
    lock_file: PathBuf,

    /// Only stop running unattended-upgrades, don't start it even when
    /// InstallOnShutdown is set
    #[arg(long)]
    stop_only: bool,

    /// Settings file path
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            debug: self.debug,
            delay_minutes: self.delay,
            lock_path: self.lock_file.clone(),
            stop_only: self.stop_only,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    ExitCode::from(run(Cli::parse()).await)
}

/// The whole startup sequence; returns the process exit status.
async fn run(cli: Cli) -> u8 {
    let settings = match config::load_config(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("unattended-upgrade-shutdown: {e}");
            return EXIT_FAILURE;
        }
    };
    let run_config = cli.run_config();

    let apt_tool = match apt_config::probe_capability(&settings.apt.config_command) {
        Capability::Available(path) => path,
        Capability::Absent => {
            // Without APT there is no unattended-upgrades to wait for.
            logging::init(&settings.paths.fallback_log_dir, run_config.debug);
            tracing::info!(
                command = %settings.apt.config_command,
                "APT configuration tool not found, nothing to stop"
            );
            return 0;
        }
    };

    let apt = match AptConfig::load(&apt_tool) {
        Ok(apt) => apt,
        Err(e) => {
            logging::init(&settings.paths.fallback_log_dir, run_config.debug);
            tracing::error!(error = %e, "cannot read APT configuration");
            return EXIT_FAILURE;
        }
    };

    let log_dir = apt.find_dir(apt_config::LOG_DIR, &settings.paths.fallback_log_dir);
    let log_target = logging::init(&log_dir, run_config.debug);
    tracing::debug!(?cli, ?log_target, "parsed CLI arguments");

    let probe = FileLockProbe::new(&run_config.lock_path, settings.lock.style);
    tracing::debug!(path = %probe.path().display(), style = ?settings.lock.style, "probing lock");

    let coordinator = Coordinator::new(
        &run_config,
        apt.find_bool(apt_config::INSTALL_ON_SHUTDOWN, false),
        Duration::from_secs(settings.poll.interval_secs),
        probe,
        UpgradeLauncher::new(&settings.upgrade),
        SignalTerminator::new(PidFile::new(&settings.paths.pid_file)),
        Notifier::from_config(&settings.notify, &settings.paths.progress_file),
    );
    tracing::debug!(
        shutdown_mode = coordinator.shutdown_mode(),
        delay_minutes = run_config.delay_minutes,
        "starting shutdown coordination"
    );

    match coordinator.run().await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "shutdown coordination finished");
            outcome.exit_code()
        }
        Err(e) => {
            tracing::error!(error = %e, "shutdown coordination failed");
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::path::Path;
    use tempfile::tempdir;

    /// Write a settings file that logs into `dir` and uses `apt_tool`.
    fn settings_with_apt_tool(dir: &Path, apt_tool: &str) -> PathBuf {
        let path = dir.join("shutdown.toml");
        std::fs::write(
            &path,
            format!(
                "[paths]\nfallback_log_dir = {:?}\n\n[apt]\nconfig_command = {apt_tool:?}\n",
                dir.join("log").display().to_string()
            ),
        )
        .unwrap();
        path
    }

    fn cli_for(settings: &Path, lock_file: &Path) -> Cli {
        Cli::try_parse_from([
            OsStr::new("unattended-upgrade-shutdown"),
            OsStr::new("--config"),
            settings.as_os_str(),
            OsStr::new("--lock-file"),
            lock_file.as_os_str(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_apt_tool_exits_success() {
        let dir = tempdir().unwrap();
        let settings = settings_with_apt_tool(dir.path(), "no-such-apt-config-tool");
        let cli = cli_for(&settings, &dir.path().join("uu.lock"));
        assert_eq!(run(cli).await, 0);
    }

    #[tokio::test]
    async fn test_failing_apt_dump_exits_failure() {
        let dir = tempdir().unwrap();
        let settings = settings_with_apt_tool(dir.path(), "false");
        let cli = cli_for(&settings, &dir.path().join("uu.lock"));
        assert_eq!(run(cli).await, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_malformed_settings_file_exits_failure() {
        let dir = tempdir().unwrap();
        let settings = dir.path().join("shutdown.toml");
        std::fs::write(&settings, "[apt\nconfig_command = ").unwrap();
        let cli = cli_for(&settings, &dir.path().join("uu.lock"));
        assert_eq!(run(cli).await, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_coordinator_error_exits_failure() {
        let dir = tempdir().unwrap();
        // `echo dump` prints nothing the store recognises, so every key defaults.
        let settings = settings_with_apt_tool(dir.path(), "echo");
        let cli = cli_for(&settings, Path::new("/nonexistent-dir/impossible/uu.lock"));
        assert_eq!(run(cli).await, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_free_lock_exits_success() {
        let dir = tempdir().unwrap();
        let settings = settings_with_apt_tool(dir.path(), "echo");
        let cli = cli_for(&settings, &dir.path().join("uu.lock"));
        assert_eq!(run(cli).await, 0);
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["unattended-upgrade-shutdown"]).unwrap();
        let run = cli.run_config();
        assert!(!run.debug);
        assert_eq!(run.delay_minutes, 25);
        assert_eq!(
            run.lock_path,
            PathBuf::from("/var/run/unattended-upgrades.lock")
        );
        assert!(!run.stop_only);
        assert_eq!(cli.config, PathBuf::from(config::DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "unattended-upgrade-shutdown",
            "--debug",
            "--delay",
            "3",
            "--lock-file",
            "/tmp/uu.lock",
            "--stop-only",
        ])
        .unwrap();
        assert_eq!(
            cli.run_config(),
            RunConfig {
                debug: true,
                delay_minutes: 3,
                lock_path: PathBuf::from("/tmp/uu.lock"),
                stop_only: true,
            }
        );
    }

    #[test]
    fn test_cli_rejects_zero_delay() {
        assert!(Cli::try_parse_from(["unattended-upgrade-shutdown", "--delay", "0"]).is_err());
    }

    #[test]
    fn test_cli_rejects_non_numeric_delay() {
        assert!(Cli::try_parse_from(["unattended-upgrade-shutdown", "--delay", "soon"]).is_err());
    }
}
