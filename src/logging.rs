//! Log file setup.
//!
//! Lines look like `2026-10-14 22:31:07,412 INFO - message key=value`, written
//! to `unattended-upgrades-shutdown.log` inside the log directory.

use chrono::Local;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "unattended-upgrades-shutdown.log";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Where log output ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

/// `timestamp LEVEL - message fields`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} {} - ",
            Local::now().format(TIMESTAMP_FORMAT),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// `RUST_LOG` wins; otherwise `--debug` picks the level.
fn filter(debug: bool) -> EnvFilter {
    filter_from(std::env::var(EnvFilter::DEFAULT_ENV).ok(), debug)
}

fn filter_from(directives: Option<String>, debug: bool) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(if debug { "debug" } else { "info" }))
}

fn subscriber<W>(make_writer: W, filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .event_format(LineFormat)
        .finish()
}

/// Install the global subscriber, appending to the log file in `log_dir`.
///
/// The directory is created when missing. If the file still cannot be
/// opened, logging falls back to stderr. Only the first call installs
/// anything.
pub fn init(log_dir: &Path, debug: bool) -> LogTarget {
    let path = log_dir.join(LOG_FILE_NAME);
    let opened = std::fs::create_dir_all(log_dir)
        .and_then(|()| OpenOptions::new().create(true).append(true).open(&path));

    match opened {
        Ok(file) => {
            let _ = tracing::subscriber::set_global_default(subscriber(Mutex::new(file), filter(debug)));
            LogTarget::File(path)
        }
        Err(e) => {
            let _ = tracing::subscriber::set_global_default(subscriber(std::io::stderr, filter(debug)));
            tracing::warn!(path = %path.display(), error = %e, "cannot open log file, logging to stderr");
            LogTarget::Stderr
        }
    }
}
