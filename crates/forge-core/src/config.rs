use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for the workflow automation subsystem
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    /// Per-action executor timeout in seconds
    pub action_timeout_secs: u64,
    /// Maximum workflows evaluated concurrently per stimulus
    pub dispatch_concurrency: usize,
    /// Scheduler poll interval in seconds
    pub scheduler_poll_secs: u64,
}

impl AutomationConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_env("FORGE")
    }

    /// Load configuration from environment with custom prefix
    pub fn load_from_env(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(
                Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("action_timeout_secs", 30)?
            .set_default("dispatch_concurrency", 16)?
            .set_default("scheduler_poll_secs", 30)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load configuration from file with environment overrides
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("FORGE").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn scheduler_poll_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_poll_secs)
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 30,
            dispatch_concurrency: 16,
            scheduler_poll_secs: 30,
        }
    }
}
