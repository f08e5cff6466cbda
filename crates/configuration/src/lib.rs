use crate::error::ConfigError;
use std::path::Path;
use std::time::Duration;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{Config, DatabaseConfig, LoggingConfig, SchedulerConfig, VenueConfig};

/// Prefix of the environment variables that override file settings,
/// e.g. `AUTOTRADER__SCHEDULER__MAX_CONCURRENCY=8`.
pub const ENV_PREFIX: &str = "AUTOTRADER";

/// Loads the application configuration.
///
/// The TOML file is optional; every setting has a default. Environment
/// variables take precedence over the file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    tracing::debug!(?config.scheduler, "Configuration loaded.");
    Ok(config)
}

impl Config {
    /// Rejects settings that would make a loop spin or never run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        let durations = [
            ("scheduler.trigger_interval", s.trigger_interval),
            ("scheduler.reconciliation_interval", s.reconciliation_interval),
            ("scheduler.market_interval", s.market_interval),
            ("scheduler.recurring_window", s.recurring_window),
            ("scheduler.venue_timeout", s.venue_timeout),
            ("scheduler.repository_timeout", s.repository_timeout),
        ];
        for (field, value) in durations {
            if value == Duration::ZERO {
                return Err(ConfigError::ValidationError { field, reason: "must be greater than zero".into() });
            }
        }
        if s.max_concurrency == 0 {
            return Err(ConfigError::ValidationError {
                field: "scheduler.max_concurrency",
                reason: "at least one worker is required".into(),
            });
        }
        if self.venue.mainnet_url.is_empty() || self.venue.testnet_url.is_empty() {
            return Err(ConfigError::ValidationError { field: "venue", reason: "base URLs must not be empty".into() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(text: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_match_documented_intervals() {
        let config = Config::default();
        assert_eq!(config.scheduler.trigger_interval, Duration::from_secs(30));
        assert_eq!(config.scheduler.reconciliation_interval, Duration::from_secs(300));
        assert_eq!(config.scheduler.duplicate_guard, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn humantime_values_and_partial_sections_are_accepted() {
        let config = from_toml(
            r#"
            [scheduler]
            trigger_interval = "10s"
            max_concurrency = 2

            [venue]
            network = "testnet"
            "#,
        );
        assert_eq!(config.scheduler.trigger_interval, Duration::from_secs(10));
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.scheduler.market_interval, Duration::from_secs(15));
        assert_eq!(config.venue.base_url(config.venue.network), "https://api.testnet.lnmarkets.com");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = from_toml("[scheduler]\nmax_concurrency = 0\n");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field: "scheduler.max_concurrency", .. }));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config("does-not-exist.toml").unwrap();
        assert_eq!(config.logging.level, "info");
    }
}
