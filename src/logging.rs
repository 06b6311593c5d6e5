//! Console and rolling-file logging for the controller daemon.
//!
//! File output rotates through tracing-appender; old files beyond the
//! configured limit are removed at start-up.

use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_PREFIX: &str = "nimbus-shade";

/// How often the daemon starts a new log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RotationPeriod {
    /// New file every minute, mostly for trying rotation out.
    Minutely,
    /// New file every hour.
    Hourly,
    /// New file every day.
    #[default]
    Daily,
    /// A single file that grows forever.
    Never,
}

impl std::str::FromStr for RotationPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minutely" | "minute" => Ok(RotationPeriod::Minutely),
            "hourly" | "hour" => Ok(RotationPeriod::Hourly),
            "daily" | "day" => Ok(RotationPeriod::Daily),
            "never" | "none" => Ok(RotationPeriod::Never),
            _ => Err(format!(
                "Invalid rotation period '{s}'. Valid options: minutely, hourly, daily, never"
            )),
        }
    }
}

impl From<RotationPeriod> for Rotation {
    fn from(period: RotationPeriod) -> Self {
        match period {
            RotationPeriod::Minutely => Rotation::MINUTELY,
            RotationPeriod::Hourly => Rotation::HOURLY,
            RotationPeriod::Daily => Rotation::DAILY,
            RotationPeriod::Never => Rotation::NEVER,
        }
    }
}

/// File logging setup, filled from the command line.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory the log files are written to.
    pub log_dir: String,
    /// File name prefix, also used to find old files to clean up.
    pub log_prefix: String,
    /// Rotation period of the appender.
    pub rotation: RotationPeriod,
    /// Maximum number of log files to keep (0 = unlimited).
    pub max_log_files: usize,
    /// Also log to stdout.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: ".".to_string(),
            log_prefix: LOG_PREFIX.to_string(),
            rotation: RotationPeriod::Daily,
            max_log_files: 7,
            console: true,
        }
    }
}

/// Keep alive for the duration of the program; dropping it flushes pending
/// file output.
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

/// Logs to stdout, filtered by `RUST_LOG`.
pub fn setup_console_logging() -> LogGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    LogGuard { _guards: vec![] }
}

/// Sets up rotating file logging, plus console output when
/// `config.console` is set.
pub fn setup_file_logging(config: &LogConfig) -> std::io::Result<LogGuard> {
    let (writer, guard) = rolling_writer(config)?;

    let file_layer = Layer::default()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = config.console.then(|| {
        Layer::default()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok(LogGuard {
        _guards: vec![guard],
    })
}

fn rolling_writer(config: &LogConfig) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    let log_dir = Path::new(&config.log_dir);
    if config.max_log_files > 0 {
        cleanup_old_logs(log_dir, &config.log_prefix, config.max_log_files)?;
    }

    let appender = RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(&config.log_prefix)
        .filename_suffix("log")
        .max_log_files(config.max_log_files)
        .build(log_dir)
        .map_err(std::io::Error::other)?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Removes all but the `max_files` most recently modified logs.
fn cleanup_old_logs(log_dir: &Path, prefix: &str, max_files: usize) -> std::io::Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let mut log_files: Vec<_> = std::fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".log"))
        })
        .filter_map(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .map(|mtime| (entry.path(), mtime))
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.into_iter().skip(max_files) {
        if let Err(e) = std::fs::remove_file(&path) {
            eprintln!("Warning: failed to remove old log file {path:?}: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_period_from_str() {
        assert_eq!(
            "hourly".parse::<RotationPeriod>().unwrap(),
            RotationPeriod::Hourly
        );
        assert_eq!(
            "NONE".parse::<RotationPeriod>().unwrap(),
            RotationPeriod::Never
        );
        assert_eq!(
            "Day".parse::<RotationPeriod>().unwrap(),
            RotationPeriod::Daily
        );
        assert!("weekly".parse::<RotationPeriod>().is_err());
    }

    #[test]
    fn test_cleanup_keeps_newest_logs() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path();

        for i in 0..4 {
            let path = log_dir.join(format!("{LOG_PREFIX}.{i}.log"));
            std::fs::write(&path, format!("line {i}")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        std::fs::write(log_dir.join("other.log"), "keep").unwrap();

        cleanup_old_logs(log_dir, LOG_PREFIX, 1).unwrap();

        let mut remaining: Vec<String> = std::fs::read_dir(log_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec![format!("{LOG_PREFIX}.3.log"), "other.log".to_string()]);
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(cleanup_old_logs(&missing, LOG_PREFIX, 3).is_ok());
    }
}
