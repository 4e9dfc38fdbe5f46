//! Logging setup shared by the crosscast binaries
//!
//! Output always goes to stderr so `cross-queue --format json` keeps a clean
//! stdout. `RUST_LOG` takes precedence over everything configured here.
//!
//! ```no_run
//! use libcrosscast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info", false).init();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// sqlx logs every statement at info; keep it quiet unless asked
const DEFAULT_DIRECTIVES: &str = "sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines, no colors
    Text,
    /// One JSON object per line, for log shippers
    Json,
    /// Multi-line with colors, for local development
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: &str, verbose: bool) -> Self {
        Self {
            format,
            level: level.to_string(),
            verbose,
        }
    }

    /// Read `CROSSCAST_LOG_FORMAT` and `CROSSCAST_LOG_LEVEL`
    ///
    /// Unparseable values fall back to text / info.
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("CROSSCAST_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var("CROSSCAST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self::new(format, &level, verbose)
    }

    /// Filter directives this config resolves to when `RUST_LOG` is unset
    pub fn directives(&self) -> String {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        format!("{},{}", level, DEFAULT_DIRECTIVES)
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }

    /// Install the global subscriber
    ///
    /// Returns `false` if one was already installed (tests, embedding).
    pub fn try_init(&self) -> bool {
        let filter = self.filter();
        let installed = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false)
                .try_init(),
        };
        installed.is_ok()
    }

    /// Like [`try_init`](Self::try_init), ignoring an existing subscriber
    pub fn init(&self) {
        if !self.try_init() {
            tracing::debug!("tracing subscriber already installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml"
            .parse::<LogFormat>()
            .unwrap_err()
            .contains("Invalid log format: 'xml'"));
    }

    #[test]
    fn test_verbose_forces_debug_directive() {
        let config = LoggingConfig::new(LogFormat::Text, "warn", true);
        assert_eq!(config.directives(), "debug,sqlx=warn");

        let quiet = LoggingConfig::new(LogFormat::Text, "warn", false);
        assert_eq!(quiet.directives(), "warn,sqlx=warn");
    }

    #[test]
    fn test_second_init_does_not_panic() {
        let config = LoggingConfig::new(LogFormat::Text, "info", false);
        config.init();
        assert!(!config.try_init());
    }
}
