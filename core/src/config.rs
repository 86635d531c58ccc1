//! Layered configuration
//!
//! Precedence, lowest first: built-in defaults, the config file
//! (`pagescript.toml` in the working directory, `PAGESCRIPT_CONFIG_PATH`, or an
//! explicit path), `PAGESCRIPT_*` environment variables (`__` separates
//! sections, e.g. `PAGESCRIPT_LIMITS__MAX_DEPTH=5`), then builder overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PAGESCRIPT";
pub const CONFIG_PATH_ENV: &str = "PAGESCRIPT_CONFIG_PATH";
const DEFAULT_CONFIG_NAME: &str = "pagescript";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution ceilings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    /// Maximum nesting of `run` steps
    pub max_depth: usize,
    /// Maximum steps started by one action invocation
    pub max_steps: usize,
    pub max_expression_depth: usize,
    pub action_timeout_ms: u64,
    /// Per-attempt timeout for steps that don't set their own
    pub step_timeout_ms: u64,
    pub max_retry_delay_ms: u64,
    pub condition_errors: ConditionErrorPolicy,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_steps: 100,
            max_expression_depth: 50,
            action_timeout_ms: 60_000,
            step_timeout_ms: 30_000,
            max_retry_delay_ms: 30_000,
            condition_errors: ConditionErrorPolicy::Proceed,
        }
    }
}

impl Limits {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// What a `when` condition that fails to evaluate does to its step
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionErrorPolicy {
    /// Run the step as if the condition held
    #[default]
    Proceed,
    Skip,
    /// Fail the action with the expression error
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// Record resolved step arguments in traces
    pub debug_trace: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug_trace: false,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with default search and no overrides
    pub fn load() -> Result<Config> {
        Config::builder().build()
    }

    fn validate(&self) -> Result<()> {
        if self.limits.max_steps == 0 {
            anyhow::bail!("limits.max_steps must be at least 1");
        }
        if self.limits.max_expression_depth == 0 {
            anyhow::bail!("limits.max_expression_depth must be at least 1");
        }
        if self.limits.action_timeout_ms == 0 || self.limits.step_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    max_depth: Option<usize>,
    max_steps: Option<usize>,
    action_timeout_ms: Option<u64>,
    log_level: Option<String>,
    debug_trace: Option<bool>,
}

impl ConfigBuilder {
    /// Explicit config file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn action_timeout_ms(mut self, ms: u64) -> Self {
        self.action_timeout_ms = Some(ms);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn debug_trace(mut self, enabled: bool) -> Self {
        self.debug_trace = Some(enabled);
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let mut builder = config::Config::builder()
            .set_default("limits.max_depth", defaults.limits.max_depth as u64)?
            .set_default("limits.max_steps", defaults.limits.max_steps as u64)?
            .set_default(
                "limits.max_expression_depth",
                defaults.limits.max_expression_depth as u64,
            )?
            .set_default("limits.action_timeout_ms", defaults.limits.action_timeout_ms)?
            .set_default("limits.step_timeout_ms", defaults.limits.step_timeout_ms)?
            .set_default("limits.max_retry_delay_ms", defaults.limits.max_retry_delay_ms)?
            .set_default("limits.condition_errors", "proceed")?
            .set_default("logging.level", defaults.logging.level.as_str())?
            .set_default("logging.debug_trace", defaults.logging.debug_trace)?;

        let explicit = self
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        builder = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file not found: {}", path.display());
                }
                builder.add_source(config::File::from(path).required(true))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(v) = self.max_depth {
            builder = builder.set_override("limits.max_depth", v as u64)?;
        }
        if let Some(v) = self.max_steps {
            builder = builder.set_override("limits.max_steps", v as u64)?;
        }
        if let Some(v) = self.action_timeout_ms {
            builder = builder.set_override("limits.action_timeout_ms", v)?;
        }
        if let Some(v) = self.log_level {
            builder = builder.set_override("logging.level", v)?;
        }
        if let Some(v) = self.debug_trace {
            builder = builder.set_override("logging.debug_trace", v)?;
        }

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }
}
