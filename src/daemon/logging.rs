use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_FILE_NAME: &str = "ccusage-daemon.log";

// ---------------------------------------------------------------------------
// RotatingLogWriter: daemon log file with a single `.old` backup
// ---------------------------------------------------------------------------

/// A file writer that rotates the log once it has grown past `max_size`.
///
/// Rotation happens before the next write: the current file is renamed to
/// `<name>.old` (replacing any earlier backup) and a fresh file is opened, so
/// at most one backup exists and the active file only holds the newest
/// entries.
pub struct RotatingLogWriter {
    file: std::fs::File,
    path: PathBuf,
    backup_path: PathBuf,
    bytes_written: u64,
    max_size: u64,
}

/// `<path>.old`, keeping the original extension.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".old");
    PathBuf::from(name)
}

impl RotatingLogWriter {
    /// Opens `path` in create+append mode and seeds the byte count from the
    /// current file size, so a log left by an earlier run rotates on time.
    pub fn new(path: PathBuf, max_size: u64) -> std::io::Result<Self> {
        let file = open_append(&path)?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            file,
            backup_path: backup_path(&path),
            path,
            bytes_written,
            max_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        if self.backup_path.exists() {
            std::fs::remove_file(&self.backup_path)?;
        }
        std::fs::rename(&self.path, &self.backup_path)?;
        self.file = open_append(&self.path)?;
        self.bytes_written = 0;
        Ok(())
    }
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

impl Write for RotatingLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.bytes_written > self.max_size {
            if let Err(e) = self.rotate() {
                // Keep appending to the oversized file rather than lose lines.
                eprintln!(
                    "WARNING: log rotation of {} failed: {}",
                    self.path.display(),
                    e
                );
            }
        }
        let n = self.file.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

// ---------------------------------------------------------------------------
// LogLineFormat: `[<timestamp>] [<LEVEL>] <message>`
// ---------------------------------------------------------------------------

/// Event formatter for the daemon log file.
pub struct LogLineFormat;

/// Level label written to the log file. TRACE folds into DEBUG.
pub fn level_label(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARNING",
        Level::INFO => "INFO",
        Level::DEBUG | Level::TRACE => "DEBUG",
    }
}

impl<S, N> FormatEvent<S, N> for LogLineFormat
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
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        write!(
            writer,
            "[{}] [{}] ",
            timestamp,
            level_label(event.metadata().level())
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Install the global subscriber: stderr plus the rotating log file in
/// `data_dir`.
///
/// `RUST_LOG` overrides `level`. If the log file cannot be opened, logging
/// falls back to stderr only. The returned guard must be kept alive until
/// exit so buffered lines reach the file.
pub fn init_logging(data_dir: &Path, level: &str, max_log_size: u64) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = data_dir.join(LOG_FILE_NAME);

    match RotatingLogWriter::new(log_path.clone(), max_log_size) {
        Ok(writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(writer);
            let file_layer = tracing_subscriber::fmt::layer()
                .event_format(LogLineFormat)
                .with_writer(non_blocking)
                .with_ansi(false);

            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();

            if result.is_ok() {
                tracing::debug!("Logging to stderr and {}", log_path.display());
            }
            Some(guard)
        }
        Err(e) => {
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();

            if result.is_ok() {
                tracing::warn!(
                    "Could not open log file {}: {}. Logging to stderr only.",
                    log_path.display(),
                    e
                );
            }
            None
        }
    }
}
