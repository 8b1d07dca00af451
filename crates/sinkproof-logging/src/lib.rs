//! Logging configuration and subscriber installation for sinkproof.
//!
//! Every crate logs through `tracing`; binaries call [`init`] once with the
//! configured [`LoggingConfig`]. `RUST_LOG`, when set, replaces the configured
//! filter entirely.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log level for filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Whether a logger at this level emits messages at `level`.
    pub fn should_log(&self, level: LogLevel) -> bool {
        *self >= level
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(anyhow!("unknown log level {other:?}")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    /// One JSON object per line, spans included.
    Json,
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level to output
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// ANSI colors; ignored for JSON output.
    #[serde(default = "default_true")]
    pub colors: bool,
    /// Per-component levels. A component is a crate suffix (`engine`,
    /// `receiver`) or a full target path.
    #[serde(default)]
    pub component_levels: BTreeMap<String, LogLevel>,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Plain,
            timestamps: true,
            colors: true,
            component_levels: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_component_level(mut self, component: impl Into<String>, level: LogLevel) -> Self {
        self.component_levels.insert(component.into(), level);
        self
    }

    /// Effective log level for a component
    pub fn effective_level(&self, component: Option<&str>) -> LogLevel {
        component
            .and_then(|c| self.component_levels.get(c))
            .copied()
            .unwrap_or(self.level)
    }

    pub fn should_log(&self, level: LogLevel, component: Option<&str>) -> bool {
        self.effective_level(component).should_log(level)
    }

    /// The filter directives this configuration stands for, e.g.
    /// `info,sinkproof_engine=debug`.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.level.to_string()];
        directives.extend(
            self.component_levels
                .iter()
                .map(|(component, level)| format!("{}={level}", target_for(component))),
        );
        directives.join(",")
    }

    /// `RUST_LOG` if set, otherwise [`LoggingConfig::directives`].
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(from_env) if !from_env.trim().is_empty() => EnvFilter::try_new(&from_env)
                .map_err(|e| anyhow!("invalid {}: {e}", EnvFilter::DEFAULT_ENV)),
            _ => EnvFilter::try_new(self.directives())
                .map_err(|e| anyhow!("invalid log directives: {e}")),
        }
    }
}

fn target_for(component: &str) -> String {
    if component.contains("::") || component.starts_with("sinkproof") {
        component.replace('-', "_")
    } else {
        format!("sinkproof_{}", component.replace('-', "_"))
    }
}

fn fmt_layer<S>(config: &LoggingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors && config.format != LogFormat::Json);
    match (config.format, config.timestamps) {
        (LogFormat::Json, true) => base.json().boxed(),
        (LogFormat::Json, false) => base.json().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Plain, true) => base.boxed(),
        (LogFormat::Plain, false) => base.without_time().boxed(),
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(config))
        .try_init()
        .map_err(|e| anyhow!("install tracing subscriber: {e}"))?;
    tracing::debug!(directives = %config.directives(), format = ?config.format, "logging initialized");
    Ok(())
}
