use crate::errors::{ConfigError, ConfigResult};
use crate::job_queue::{ConcurrencyLimit, ExecutionGate};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub job_queue: JobQueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueueConfig {
    /// Maximum number of queue keys executing at once (0 = unbounded)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Whether jobs are admitted at startup
    #[serde(default = "default_execution_enabled")]
    pub enabled: bool,
    /// How long shutdown waits for executing jobs before killing them
    #[serde(
        default = "default_shutdown_timeout",
        with = "duration_serde::duration"
    )]
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

fn default_execution_enabled() -> bool {
    DEFAULT_EXECUTION_ENABLED
}

fn default_shutdown_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_SHUTDOWN_TIMEOUT).unwrap_or(Duration::from_secs(30))
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            enabled: default_execution_enabled(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl JobQueueConfig {
    /// Live limit seeded from this configuration
    pub fn concurrency_limit(&self) -> ConcurrencyLimit {
        ConcurrencyLimit::new(self.max_concurrent_jobs)
    }

    /// Execution gate seeded from this configuration
    pub fn execution_gate(&self) -> ExecutionGate {
        ExecutionGate::new(self.enabled)
    }
}

impl Config {
    /// Layered configuration: defaults, then the TOML file, then environment
    ///
    /// `KEYED_JOB_QUEUE_JOB_QUEUE__MAX_CONCURRENT_JOBS=4` style variables
    /// override nested keys; a bare `MAX_CONCURRENT_JOBS` overrides the limit.
    pub fn figment(config_file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&[ENV_MAX_CONCURRENT_JOBS])
                    .map(|_| "job_queue.max_concurrent_jobs".into()),
            )
    }

    /// Load configuration, writing a default file first if none exists
    pub fn load_from_file(config_file: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_file = config_file.as_ref();

        if !config_file.exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents).map_err(|source| ConfigError::WriteDefault {
                path: config_file.display().to_string(),
                source,
            })?;
            info!("Created default config file: {}", config_file.display());
        }

        let config: Self = Self::figment(config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let level = self.logging.level.to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown log level '{}'", self.logging.level),
            ));
        }
        Ok(())
    }
}
