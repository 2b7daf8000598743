use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use log::{Level, LevelFilter};
use serde::{Deserialize, Serialize};

/// All crates of this workspace, used to configure maximum log levels.
const CRATE_NAMES: &[&str] = &[
    "tally_base_schema",
    "tally_dynamic_config",
    "tally_expressions",
    "tally_log",
    "tally_metrics",
    "tally_statsd",
];

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  tally_metrics::sinks > flushed summary statistics
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z [tally_metrics::sinks] INFO: flushed summary statistics
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","logger":"tally_metrics::sinks","message":"flushed summary statistics","module_path":"tally_metrics::sinks","filename":"tally-metrics/src/sinks/summary.rs","lineno":31}
    /// ```
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for the workspace crates.
    pub level: LevelFilter,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            format: LogFormat::Auto,
        }
    }
}

/// Configures the given log level for all of the workspace's crates.
fn set_default_filters(builder: &mut env_logger::Builder) {
    // Configure INFO as default for all third-party crates.
    builder.filter_level(LevelFilter::Info);

    // Add all internal modules with maximum log-level.
    for name in CRATE_NAMES {
        builder.filter_module(name, LevelFilter::Trace);
    }
}

/// Initialize the logging system.
///
/// # Example
///
/// ```
/// let config = tally_log::LogConfig::default();
/// tally_log::init(&config);
/// ```
pub fn init(config: &LogConfig) {
    let mut log_builder = env_logger::Builder::from_env(env_logger::DEFAULT_FILTER_ENV);
    if std::env::var(env_logger::DEFAULT_FILTER_ENV).is_err() {
        set_default_filters(&mut log_builder);
    }

    match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => log_builder.format(format_pretty),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => log_builder.format(format_plain),
        (LogFormat::Json, _) => log_builder.format(format_json),
    };

    log::set_max_level(config.level);
    log::set_boxed_logger(Box::new(log_builder.build())).ok();
}

static MAX_MODULE_WIDTH: AtomicUsize = AtomicUsize::new(0);

fn max_target_width(target: &str) -> usize {
    let len = target.len();
    MAX_MODULE_WIDTH.fetch_max(len, Ordering::Relaxed).max(len)
}

fn format_pretty(f: &mut env_logger::fmt::Formatter, record: &log::Record) -> io::Result<()> {
    let color = match record.level() {
        Level::Trace => env_logger::fmt::Color::Magenta,
        Level::Debug => env_logger::fmt::Color::Blue,
        Level::Info => env_logger::fmt::Color::Green,
        Level::Warn => env_logger::fmt::Color::Yellow,
        Level::Error => env_logger::fmt::Color::Red,
    };

    let mut style = f.style();
    let styled_level = style.set_color(color).value(record.level());

    let mut style = f.style();
    let target = record.target();
    let styled_target = style.set_bold(true).value(target);

    writeln!(
        f,
        " {styled_level:5} {styled_target:width$} > {}",
        record.args(),
        width = max_target_width(target),
    )
}

fn format_plain(f: &mut env_logger::fmt::Formatter, record: &log::Record) -> io::Result<()> {
    let ts = f.timestamp();

    writeln!(
        f,
        "{} [{}] {}: {}",
        ts,
        record.module_path().unwrap_or("<unknown>"),
        record.level(),
        record.args()
    )
}

#[derive(Serialize, Deserialize, Debug)]
struct LogRecord<'a> {
    timestamp: DateTime<Utc>,
    level: Level,
    logger: &'a str,
    message: String,
    module_path: Option<&'a str>,
    filename: Option<&'a str>,
    lineno: Option<u32>,
}

fn format_json(mut f: &mut env_logger::fmt::Formatter, record: &log::Record) -> io::Result<()> {
    let record = LogRecord {
        timestamp: Utc::now(),
        level: record.level(),
        logger: record.target(),
        message: record.args().to_string(),
        module_path: record.module_path(),
        filename: record.file(),
        lineno: record.line(),
    };

    serde_json::to_writer(&mut f, &record).map_err(io::Error::other)?;

    f.write_all(b"\n")
}
