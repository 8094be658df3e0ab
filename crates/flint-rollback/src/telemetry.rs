//! Subscriber setup: stdout layer, optional rolling file layer, `FLINT_LOG` filter.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::metadata::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};

const LOG_FILE_PREFIX: &str = "flint-rollback.log";
const FILTER_ENV: &str = "FLINT_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
    /// Used when `logging.file.dir` is unset.
    pub default_log_dir: PathBuf,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig, default_log_dir: PathBuf) -> Self {
        Self {
            verbosity,
            logging,
            default_log_dir,
        }
    }
}

/// Keeps the non-blocking file writer flushing until dropped.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber. If one is already installed (the host
/// platform owns logging) this only returns an empty guard.
pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = build_filter(config.verbosity, config.logging.filter.as_deref());

    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.logging.stdout {
        layers.push(build_stdout_layer(config.logging.stdout_format));
    }

    let mut prune_report = None;
    let mut setup_error = None;
    if config.logging.file.enabled {
        let dir = config
            .logging
            .file
            .dir
            .clone()
            .unwrap_or_else(|| config.default_log_dir.clone());
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let policy = RetentionPolicy::from_file_config(&config.logging.file);
                if policy.is_enabled() {
                    match prune_logs(&dir, policy, SystemTime::now()) {
                        Ok(report) => prune_report = Some(report),
                        Err(err) => setup_error = Some(format!("log retention failed: {err}")),
                    }
                }
                let (layer, guard) = build_file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));

    if Registry::default().with(layers).try_init().is_err() {
        return TelemetryGuard { _guards: guards };
    }

    if let Some(report) = prune_report {
        tracing::info!(
            pruned = report.removed,
            failed = report.failed,
            candidates = report.candidates,
            "log retention applied"
        );
    }
    if let Some(error) = setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

/// `FLINT_LOG` wins over the configured filter, which wins over verbosity.
fn build_filter(verbosity: u8, configured: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(level_from_verbosity(verbosity).into());
    match std::env::var(FILTER_ENV) {
        Ok(raw) if !raw.trim().is_empty() => builder.parse_lossy(raw),
        _ => match configured {
            Some(directives) => builder.parse_lossy(directives),
            None => builder.parse_lossy(""),
        },
    }
}

fn level_from_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn build_stdout_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_writer(std::io::stderr)
                .with_targets(true),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true),
        ),
    }
}

fn build_file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
    let rotation = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: BoxedLayer = match config.format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true),
        ),
    };
    (layer, guard)
}

#[derive(Clone, Copy, Debug, Default)]
struct RetentionPolicy {
    max_age: Option<Duration>,
    max_files: Option<usize>,
}

impl RetentionPolicy {
    fn from_file_config(config: &FileLoggingConfig) -> Self {
        Self {
            max_age: config
                .retention_max_age_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
            max_files: config.retention_max_files,
        }
    }

    fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_files.is_some()
    }

    /// Splits `files` into the ones to delete; survivors stay in `files`,
    /// oldest first.
    fn select_expired(&self, files: &mut Vec<(PathBuf, SystemTime)>, now: SystemTime) -> Vec<PathBuf> {
        files.sort_by_key(|(_, modified)| *modified);
        let mut expired = Vec::new();
        if let Some(max_age) = self.max_age {
            let (old, fresh): (Vec<_>, Vec<_>) = files.drain(..).partition(|(_, modified)| {
                now.duration_since(*modified).unwrap_or(Duration::ZERO) > max_age
            });
            expired.extend(old.into_iter().map(|(path, _)| path));
            *files = fresh;
        }
        if let Some(max_files) = self.max_files
            && files.len() > max_files
        {
            let excess = files.len() - max_files;
            expired.extend(files.drain(..excess).map(|(path, _)| path));
        }
        expired
    }
}

#[derive(Clone, Debug, Default)]
struct PruneReport {
    candidates: usize,
    removed: usize,
    failed: usize,
}

fn prune_logs(dir: &Path, policy: RetentionPolicy, now: SystemTime) -> std::io::Result<PruneReport> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_ours = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if !is_ours {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push((path, meta.modified().unwrap_or(now)));
        }
    }

    let mut report = PruneReport {
        candidates: files.len(),
        ..PruneReport::default()
    };
    for path in policy.select_expired(&mut files, now) {
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(_) => report.failed += 1,
        }
    }
    Ok(report)
}
