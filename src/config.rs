use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the optional settings file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/unattended-upgrades/shutdown.toml";

/// Top-level settings loaded from shutdown.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ShutdownConfig {
    pub paths: PathsConfig,
    pub upgrade: UpgradeConfig,
    pub poll: PollConfig,
    pub lock: LockConfig,
    pub notify: NotifyConfig,
    pub apt: AptToolConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub pid_file: PathBuf,
    pub progress_file: PathBuf,
    pub fallback_log_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub shutdown_env: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
}

/// Which kernel locking primitive the lock prober uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockStyle {
    /// POSIX record lock, the primitive APT itself uses.
    #[default]
    Fcntl,
    /// BSD whole-file lock.
    Flock,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LockConfig {
    pub style: LockStyle,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub plymouth: PathBuf,
    pub usplash: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AptToolConfig {
    pub config_command: String,
}

// --- Default implementations ---

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from("/var/run/unattended-upgrades.pid"),
            progress_file: PathBuf::from("/var/run/unattended-upgrades.progress"),
            fallback_log_dir: PathBuf::from("/var/log/unattended-upgrades/"),
        }
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            command: "unattended-upgrade".to_string(),
            args: Vec::new(),
            shutdown_env: "UNATTENDED_UPGRADES_FORCE_INSTALL_ON_SHUTDOWN".to_string(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            plymouth: PathBuf::from("/bin/plymouth"),
            usplash: PathBuf::from("/sbin/usplash_write"),
        }
    }
}

impl Default for AptToolConfig {
    fn default() -> Self {
        Self {
            config_command: "apt-config".to_string(),
        }
    }
}

/// Errors from loading the settings file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidPollInterval,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
            ConfigError::InvalidPollInterval => {
                write!(f, "poll.interval_secs must be greater than 0")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidPollInterval => None,
        }
    }
}

/// Load settings from `path`. A missing file means "all defaults".
pub fn load_config(path: &Path) -> Result<ShutdownConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ShutdownConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let config: ShutdownConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    if config.poll.interval_secs == 0 {
        return Err(ConfigError::InvalidPollInterval);
    }
    Ok(config)
}

/// Settings derived from the command line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub debug: bool,
    pub delay_minutes: u64,
    pub lock_path: PathBuf,
    pub stop_only: bool,
}

impl RunConfig {
    /// Whether the upgrade should be launched to finish installing.
    ///
    /// `--stop-only` always wins over the configured value.
    pub fn shutdown_mode(&self, install_on_shutdown: bool) -> bool {
        !self.stop_only && install_on_shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_config(stop_only: bool) -> RunConfig {
        RunConfig {
            debug: false,
            delay_minutes: 25,
            lock_path: PathBuf::from("/var/run/unattended-upgrades.lock"),
            stop_only,
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(
            config.paths.pid_file,
            PathBuf::from("/var/run/unattended-upgrades.pid")
        );
        assert_eq!(config.poll.interval_secs, 5);
        assert_eq!(config.lock.style, LockStyle::Fcntl);
        assert_eq!(config.upgrade.command, "unattended-upgrade");
        assert_eq!(
            config.upgrade.shutdown_env,
            "UNATTENDED_UPGRADES_FORCE_INSTALL_ON_SHUTDOWN"
        );
        assert_eq!(config.apt.config_command, "apt-config");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shutdown.toml");
        std::fs::write(
            &path,
            "[lock]\nstyle = \"flock\"\n\n[upgrade]\nargs = [\"--verbose\"]\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.lock.style, LockStyle::Flock);
        assert_eq!(config.upgrade.args, vec!["--verbose"]);
        assert_eq!(config.upgrade.command, "unattended-upgrade");
        assert_eq!(config.notify.plymouth, PathBuf::from("/bin/plymouth"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shutdown.toml");
        std::fs::write(&path, "[poll\ninterval_secs = ").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shutdown.toml");
        std::fs::write(&path, "[poll]\ninterval_secs = 0\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPollInterval));
    }

    #[test]
    fn test_shutdown_mode_follows_config() {
        assert!(run_config(false).shutdown_mode(true));
        assert!(!run_config(false).shutdown_mode(false));
    }

    #[test]
    fn test_stop_only_forces_shutdown_mode_off() {
        assert!(!run_config(true).shutdown_mode(true));
        assert!(!run_config(true).shutdown_mode(false));
    }
}
