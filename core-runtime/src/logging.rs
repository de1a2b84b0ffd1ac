//! # Logging
//!
//! One `tracing-subscriber` registry for the whole process: an `EnvFilter`
//! in front of a single formatting layer whose shape depends on
//! [`LogFormat`]. Query jobs run on threads named `collection-query-N`, so
//! turning on thread display is the quickest way to tell a job's events from
//! the caller's.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug)
//!         .with_thread_info(true),
//! )?;
//! tracing::info!("Collection engine started");
//! ```
//!
//! Track locations identify a user's files. Log them through
//! [`strip_path`] or [`redact_if_sensitive`], never raw.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Targets enabled at the configured level when no filter is given.
const WORKSPACE_CRATES: &[&str] = &[
    "amarok_collection",
    "core_runtime",
    "core_collection",
    "store_traits",
];

/// Dependencies that are noisy below `warn`.
const QUIET_DEPENDENCIES: &[&str] = &["sqlx"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, coloured; for a terminal.
    Pretty,
    /// One JSON object per event.
    Json,
    /// One line per event.
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level of the workspace crates; ignored when `filter` is set.
    pub level: LogLevel,
    /// Full `EnvFilter` directive string, e.g. `core_collection=trace,sqlx=info`.
    pub filter: Option<String>,
    /// Emit an event when a span (a query job, a store write) closes.
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }

    fn directives(&self) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        let level = self.level.directive();
        WORKSPACE_CRATES
            .iter()
            .map(|target| format!("{target}={level}"))
            .chain(QUIET_DEPENDENCIES.iter().map(|target| format!("{target}=warn")))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`Error::Config`] when the filter does not parse, [`Error::Logging`] when
/// a subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    tracing_subscriber::registry()
        .with(format_layer(&config))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(format!("Logging already initialized: {e}")))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(config.directives())
        .map_err(|e| Error::Config(format!("Invalid log filter: {e}")))
}

fn format_layer(config: &LoggingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let spans = if config.enable_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => layer.pretty().with_span_events(spans).boxed(),
        LogFormat::Compact => layer.compact().with_span_events(spans).boxed(),
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
    }
}

/// Value of `field` as it may appear in a log line.
///
/// Location fields (`url`, `rpath`, `path`, `location`) keep only their
/// basename. Credentials that can ride along in a database URL are hidden.
///
/// ```ignore
/// debug!(url = %redact_if_sensitive("url", track.url()), "Track updated");
/// ```
pub fn redact_if_sensitive(field: &str, value: &str) -> String {
    let field = field.to_lowercase();
    let is = |names: &[&str]| names.iter().any(|name| field.contains(name));

    if is(&["password", "token", "secret"]) {
        "[REDACTED]".to_string()
    } else if is(&["url", "path", "location"]) {
        strip_path(value).to_string()
    } else {
        value.to_string()
    }
}

/// Last component of a `/` or `\` separated path.
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_name_workspace_crates() {
        let config = LoggingConfig::default().with_level(LogLevel::Debug);
        let directives = config.directives();
        assert!(directives.contains("core_collection=debug"));
        assert!(directives.contains("store_traits=debug"));
        assert!(directives.ends_with("sqlx=warn"));
        assert!(build_filter(&config).is_ok());
    }

    #[test]
    fn test_custom_filter_replaces_level() {
        let config = LoggingConfig::default()
            .with_level(LogLevel::Error)
            .with_filter("core_collection=trace");
        assert_eq!(config.directives(), "core_collection=trace");
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = LoggingConfig::default().with_filter("core_collection=loudest");
        assert!(matches!(build_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_format_follows_build_profile() {
        let expected = if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        };
        assert_eq!(LogFormat::default(), expected);
    }

    #[test]
    fn test_strip_path() {
        assert_eq!(strip_path("/srv/music/fire.mp3"), "fire.mp3");
        assert_eq!(strip_path("C:\\Music\\water.flac"), "water.flac");
        assert_eq!(strip_path("wind.ogg"), "wind.ogg");
        assert_eq!(strip_path("/covers/"), "");
    }

    #[test]
    fn test_redaction() {
        assert_eq!(redact_if_sensitive("rpath", "./Music/water.mp3"), "water.mp3");
        assert_eq!(redact_if_sensitive("db_password", "hunter2"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("title", "Firefly"), "Firefly");
    }
}
