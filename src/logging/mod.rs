//! Logging infrastructure - structured tracing of control calls
//!
//! Every control call emits a `trace` event under target
//! `jemalloc_introspect::ctl`, failures a `warn`. Composite queries (`options`, `stats`, ...) run inside a `query`
//! span. Nothing is printed unless a subscriber is installed, either by the
//! host application or through [`init`].

use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

#[doc(hidden)]
pub use tracing;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();

const ENV_LEVEL: &str = "JEMALLOC_INTROSPECT_LOG_LEVEL";
const ENV_FILE: &str = "JEMALLOC_INTROSPECT_LOG_FILE";
const ENV_JSON: &str = "JEMALLOC_INTROSPECT_LOG_JSON";
const ENV_SPANS: &str = "JEMALLOC_INTROSPECT_LOG_SPANS";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    /// Daily-rotated files `<directory>/<prefix>.YYYY-MM-DD`
    File { directory: PathBuf, prefix: String },
}

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Show span events (new/close)
    pub show_spans: bool,
    /// Extra filter directives (e.g. "jemalloc_introspect::ctl=trace")
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            output: LogOutput::Stderr,
            show_spans: false,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the `JEMALLOC_INTROSPECT_LOG_*` variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(level_str) = std::env::var(ENV_LEVEL) {
            config.level = parse_level(&level_str).unwrap_or(Level::INFO);
        }

        if let Ok(dir) = std::env::var(ENV_FILE) {
            config.output = LogOutput::File {
                directory: PathBuf::from(dir),
                prefix: "jemalloc-introspect".to_string(),
            };
        }

        if std::env::var(ENV_JSON).is_ok() {
            config.format = LogFormat::Json;
        }

        config.show_spans = std::env::var(ENV_SPANS).is_ok();

        config
    }

    /// Errors only
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Every control call, with span events
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            show_spans: true,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_spans(mut self, enabled: bool) -> Self {
        self.show_spans = enabled;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install a subscriber configured from the environment
pub fn init() -> Option<WorkerGuard> {
    init_with_config(LogConfig::from_env())
}

/// Install a subscriber for `config`
///
/// Only the first call installs a subscriber; later calls return `None`.
/// Keep the returned guard alive so buffered lines are flushed.
pub fn init_with_config(config: LogConfig) -> Option<WorkerGuard> {
    let mut guard = None;
    SUBSCRIBER_INSTALLED.get_or_init(|| {
        let (writer, g) = match &config.output {
            LogOutput::Stderr => tracing_appender::non_blocking(std::io::stderr()),
            LogOutput::File { directory, prefix } => {
                tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix))
            }
        };
        guard = Some(g);

        let filter = build_filter(&config);
        let span_events = if config.show_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let layer = match config.format {
            LogFormat::Compact => fmt::layer()
                .with_writer(writer)
                .compact()
                .with_span_events(span_events)
                .with_target(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_writer(writer)
                .json()
                .with_span_events(span_events)
                .with_filter(filter)
                .boxed(),
        };

        // Another subscriber may already own the global slot.
        tracing_subscriber::registry().with(layer).try_init().ok();
    });
    guard
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "jemalloc_introspect={}",
            config.level.as_str().to_lowercase()
        ))
    });

    match &config.filter {
        Some(directives) => directives.split(',').fold(base, |filter, directive| {
            match directive.trim().parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => {
                    warn!(directive, "ignoring invalid filter directive");
                    filter
                }
            }
        }),
        None => base,
    }
}

/// Whether [`init_with_config`] has run
pub fn is_initialized() -> bool {
    SUBSCRIBER_INSTALLED.get().is_some()
}

// ============================================================================
// Control-path events
// ============================================================================

// Must stay under the crate name for `build_filter` directives to match.
const TARGET_CTL: &str = "jemalloc_introspect::ctl";
const TARGET_QUERY: &str = "jemalloc_introspect::query";
const TARGET_NATIVE: &str = "jemalloc_introspect::ctl::native";

/// Log a successful read
#[inline]
pub fn log_ctl_read(name: &str, len: usize) {
    trace!(target: TARGET_CTL, name, len, "mallctl read");
}

/// Log a successful write
#[inline]
pub fn log_ctl_write(name: &str, len: usize) {
    trace!(target: TARGET_CTL, name, len, "mallctl write");
}

/// Log a failed control call
pub fn log_ctl_failure(name: &str, status: i32) {
    warn!(target: TARGET_CTL, name, status, "mallctl failed");
}

/// Log a write-once cache being filled
pub fn log_cache_fill(cache: &str, entries: usize) {
    debug!(target: TARGET_QUERY, cache, entries, "cache populated");
}

/// Log a version-dependent property that this build does not provide
pub fn log_capability_absent(name: &str, reason: &str) {
    debug!(target: TARGET_QUERY, name, reason, "property not available");
}

/// Log where the native entry point came from
pub fn log_library_resolved(source: &str, stats_print: bool) {
    info!(target: TARGET_NATIVE, source, stats_print, "jemalloc control interface resolved");
}

/// Open a debug span for a composite query
///
/// Usage:
/// ```ignore
/// let _span = query_span!("stats");
/// ```
#[macro_export]
macro_rules! query_span {
    ($name:expr) => {
        $crate::logging::tracing::debug_span!("query", name = $name).entered()
    };
    ($name:expr, $($field:tt)+) => {
        $crate::logging::tracing::debug_span!("query", name = $name, $($field)+).entered()
    };
}
