//! Read-only view of the APT configuration tree.
//!
//! The store is loaded once from `apt-config dump` and then queried by key.
//! Keys are case-insensitive, as in APT itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const INSTALL_ON_SHUTDOWN: &str = "Unattended-Upgrade::InstallOnShutdown";
pub const LOG_DIR: &str = "Unattended-Upgrade::LogDir";

/// Result of checking whether the APT configuration tool is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Available(PathBuf),
    Absent,
}

/// Resolve `command` the way a shell would.
///
/// Commands containing a `/` are checked directly; bare names are searched
/// for in every `PATH` entry.
pub fn probe_capability(command: &str) -> Capability {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    probe_capability_in(command, &path_var)
}

fn probe_capability_in(command: &str, path_var: &std::ffi::OsStr) -> Capability {
    if command.contains('/') {
        let path = PathBuf::from(command);
        return if is_executable(&path) {
            Capability::Available(path)
        } else {
            Capability::Absent
        };
    }

    std::env::split_paths(path_var)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
        .map_or(Capability::Absent, Capability::Available)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Errors from loading the APT configuration.
#[derive(Debug)]
pub enum AptConfigError {
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },
    Failed {
        command: PathBuf,
        code: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for AptConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AptConfigError::Spawn { command, source } => {
                write!(f, "failed to run {} dump: {source}", command.display())
            }
            AptConfigError::Failed {
                command,
                code,
                stderr,
            } => {
                write!(f, "{} dump exited with {code:?}", command.display())?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AptConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AptConfigError::Spawn { source, .. } => Some(source),
            AptConfigError::Failed { .. } => None,
        }
    }
}

/// Snapshot of the APT configuration tree.
#[derive(Debug, Default, Clone)]
pub struct AptConfig {
    values: HashMap<String, String>,
}

impl AptConfig {
    /// Run `<command> dump` and parse its output.
    pub fn load(command: &Path) -> Result<Self, AptConfigError> {
        let output = Command::new(command)
            .arg("dump")
            .output()
            .map_err(|e| AptConfigError::Spawn {
                command: command.to_path_buf(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(AptConfigError::Failed {
                command: command.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let config = Self::parse(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(entries = config.values.len(), "loaded APT configuration");
        Ok(config)
    }

    /// Parse `Key "value";` lines. Unrecognised lines are skipped.
    pub fn parse(dump: &str) -> Self {
        let mut values = HashMap::new();
        for line in dump.lines() {
            let Some((key, value)) = parse_line(line) else {
                continue;
            };
            // "Foo::Bar:: ..." entries are list items, not scalar settings.
            if key.ends_with("::") {
                continue;
            }
            values.insert(key.to_ascii_lowercase(), value);
        }
        Self { values }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Boolean lookup with APT's truthy/falsy spellings.
    pub fn find_bool(&self, key: &str, default: bool) -> bool {
        let Some(value) = self.get(key) else {
            return default;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "with" | "on" | "enable" => true,
            "0" | "no" | "false" | "without" | "off" | "disable" => false,
            other => {
                tracing::debug!(key, value = other, "unrecognised boolean value, using default");
                default
            }
        }
    }

    /// Directory lookup; empty values fall back to `default`.
    pub fn find_dir(&self, key: &str, default: &Path) -> PathBuf {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
            _ => default.to_path_buf(),
        }
    }
}

fn parse_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    let (key, rest) = line.split_once(' ')?;
    let rest = rest.trim().strip_suffix(';')?;
    let quoted = rest.strip_prefix('"')?.strip_suffix('"')?;
    Some((key, percent_decode(quoted)))
}

/// Undo the `%XX` escaping `apt-config dump` applies to quotes and friends.
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hi = hex_value(bytes[i + 1]);
            let lo = hex_value(bytes[i + 2]);
            out.push(hi << 4 | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}
