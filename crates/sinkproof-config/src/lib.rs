//! Configuration management and loading for sinkproof.
//!
//! A config file is YAML or JSON, picked by extension. Every field has a
//! default, so an empty file is a valid configuration. A few settings can be
//! overridden from the environment, see [`SinkproofConfig::apply_env`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sinkproof_assert::PollConfig;
use sinkproof_engine::{Engine, ExitPolicy, RunOptions, Suite};
use sinkproof_error::SinkproofError;
use sinkproof_identity::VerifierConfig;
use sinkproof_logging::{LogFormat, LogLevel, LoggingConfig};
use sinkproof_ports::FeatureFlags;
use std::path::Path;

pub const ENV_POLL_INTERVAL_MS: &str = "SINKPROOF_POLL_INTERVAL_MS";
pub const ENV_POLL_TIMEOUT_MS: &str = "SINKPROOF_POLL_TIMEOUT_MS";
pub const ENV_OIDC_ISSUER: &str = "SINKPROOF_OIDC_ISSUER";
pub const ENV_LOG_LEVEL: &str = "SINKPROOF_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SINKPROOF_LOG_FORMAT";

/// Configuration format types supported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    Json,
    #[default]
    Yaml,
}

impl ConfigFormat {
    /// `json` means JSON; anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// How a suite of features is run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    #[serde(default)]
    pub policy: ExitPolicy,
    /// Features in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Prefix of each feature's random namespace.
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
}

fn default_concurrency() -> usize {
    4
}

fn default_namespace_prefix() -> String {
    "sinkproof".into()
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            policy: ExitPolicy::default(),
            concurrency: default_concurrency(),
            namespace_prefix: default_namespace_prefix(),
        }
    }
}

/// Main sinkproof configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkproofConfig {
    /// Waiting on eventually consistent conditions
    #[serde(default)]
    pub poll: PollConfig,
    /// Token verification
    #[serde(default)]
    pub identity: VerifierConfig,
    /// Assertion selection and deadlines
    #[serde(default)]
    pub run: RunOptions,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Feature flags of the environment, when not discovered from it.
    #[serde(default)]
    pub flags: FeatureFlags,
}

impl SinkproofConfig {
    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides looked up with `lookup`; unset or blank variables
    /// leave the value alone.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_POLL_INTERVAL_MS) {
            self.poll.interval_ms = parse_ms(ENV_POLL_INTERVAL_MS, &v)?;
        }
        if let Some(v) = get(ENV_POLL_TIMEOUT_MS) {
            self.poll.timeout_ms = parse_ms(ENV_POLL_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = get(ENV_OIDC_ISSUER) {
            self.identity.issuer = v.trim().to_string();
        }
        if let Some(v) = get(ENV_LOG_LEVEL) {
            self.logging.level = v
                .parse::<LogLevel>()
                .map_err(|e| SinkproofError::Config(format!("{ENV_LOG_LEVEL}: {e}")))?;
        }
        if let Some(v) = get(ENV_LOG_FORMAT) {
            self.logging.format = match v.trim().to_ascii_lowercase().as_str() {
                "plain" => LogFormat::Plain,
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                other => {
                    return Err(SinkproofError::Config(format!(
                        "{ENV_LOG_FORMAT}: unknown format {other:?}"
                    ))
                    .into());
                }
            };
        }
        Ok(())
    }

    /// Rejects settings no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 {
            return Err(SinkproofError::Config("poll.interval_ms must be positive".into()).into());
        }
        if self.identity.issuer.trim().is_empty() {
            return Err(SinkproofError::Config("identity.issuer must not be empty".into()).into());
        }
        if self.suite.concurrency == 0 {
            return Err(SinkproofError::Config("suite.concurrency must be positive".into()).into());
        }
        Ok(())
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.run.clone())
    }

    pub fn suite(&self) -> Suite {
        Suite::new(self.engine())
            .with_policy(self.suite.policy)
            .with_concurrency(self.suite.concurrency)
            .with_namespace_prefix(&self.suite.namespace_prefix)
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| SinkproofError::Config(format!("{key}: {value:?} is not a number of milliseconds: {e}")).into())
}

/// Parses `contents` as `format`.
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<SinkproofConfig> {
    let config = match format {
        ConfigFormat::Json => serde_json::from_str(contents)
            .map_err(|e| SinkproofError::Config(format!("failed to parse JSON config: {e}")))?,
        // An empty YAML document is null, not an empty map.
        ConfigFormat::Yaml if contents.trim().is_empty() => SinkproofConfig::default(),
        ConfigFormat::Yaml => serde_yaml::from_str(contents)
            .map_err(|e| SinkproofError::Config(format!("failed to parse YAML config: {e}")))?,
    };
    Ok(config)
}

/// Load configuration from a file
pub fn load_config(path: impl AsRef<Path>) -> Result<SinkproofConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    parse_config(&contents, ConfigFormat::from_path(path))
        .with_context(|| format!("load config {}", path.display()))
}

/// The effective configuration: `path` (or defaults) plus environment
/// overrides, validated.
pub fn load_effective(path: Option<&Path>) -> Result<SinkproofConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => SinkproofConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config(config: &SinkproofConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let contents = render_config(config, ConfigFormat::from_path(path))?;
    std::fs::write(path, contents).with_context(|| format!("write config {}", path.display()))
}

pub fn render_config(config: &SinkproofConfig, format: ConfigFormat) -> Result<String> {
    Ok(match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)
            .map_err(|e| SinkproofError::Config(format!("failed to serialize JSON config: {e}")))?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)
            .map_err(|e| SinkproofError::Config(format!("failed to serialize YAML config: {e}")))?,
    })
}
