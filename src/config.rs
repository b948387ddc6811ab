use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub status_api: StatusApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in the shared pool (lock connections are separate)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Cadences of the supervision loops
#[derive(Debug, Clone, Deserialize)]
pub struct TimingConfig {
    /// Heartbeat refresh interval in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Upper bound on a single idle sleep in the job runner
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// Service reconciliation tick in milliseconds
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    /// Heartbeat age after which a row is reported stale
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_idle_sleep_ms() -> u64 {
    500
}

fn default_reconcile_interval_ms() -> u64 {
    5_000
}

fn default_stale_after_secs() -> u64 {
    30
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl TimingConfig {
    pub fn timings(&self) -> SupervisorTimings {
        SupervisorTimings {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            idle_sleep: Duration::from_millis(self.idle_sleep_ms),
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms),
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Loop cadences handed to the job runner and service supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
    pub heartbeat_interval: Duration,
    pub idle_sleep: Duration,
    pub reconcile_interval: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        TimingConfig::default().timings()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusApiConfig {
    /// Listen address of the built-in status API service
    #[serde(default = "default_status_bind")]
    pub bind: String,
}

fn default_status_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for StatusApiConfig {
    fn default() -> Self {
        Self {
            bind: default_status_bind(),
        }
    }
}

impl SchedulerConfig {
    /// Defaults for every section around the given database URL
    pub fn with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: url.to_string(),
                max_connections: default_max_connections(),
            },
            scheduler: TimingConfig::default(),
            logging: LoggingConfig::default(),
            status_api: StatusApiConfig::default(),
        }
    }

    /// Load configuration from the default file and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/scheduler.toml")
    }

    /// Load configuration from a specific file (missing file is fine)
    pub fn load_from<P: AsRef<Path>>(config_file: P) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Start with default values
            .set_default("database.max_connections", 5)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_file.as_ref()).required(false))
            // Override with environment variables (PLOY_SCHEDULER__DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("PLOY_SCHEDULER")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let timing = &self.scheduler;

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if timing.heartbeat_interval_ms == 0 {
            errors.push("heartbeat_interval_ms must be positive".to_string());
        }

        if timing.idle_sleep_ms == 0 {
            errors.push("idle_sleep_ms must be positive".to_string());
        }

        if timing.reconcile_interval_ms == 0 {
            errors.push("reconcile_interval_ms must be positive".to_string());
        }

        if timing.idle_sleep_ms > timing.heartbeat_interval_ms {
            errors.push(
                "idle_sleep_ms should not exceed heartbeat_interval_ms".to_string(),
            );
        }

        if timing.stale_after_secs * 1000 <= timing.heartbeat_interval_ms {
            errors.push("stale_after_secs must exceed the heartbeat interval".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchedulerConfig {
        SchedulerConfig::with_database_url("postgres://localhost/ploy")
    }

    #[test]
    fn test_default_timings() {
        let timings = SupervisorTimings::default();
        assert_eq!(timings.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(timings.idle_sleep, Duration::from_millis(500));
        assert_eq!(timings.reconcile_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_defaults() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_database_url() {
        let errors = SchedulerConfig::with_database_url("").validate().unwrap_err();
        assert_eq!(errors, vec!["database.url must be set".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let mut config = sample();
        config.scheduler.idle_sleep_ms = 10_000;
        config.scheduler.reconcile_interval_ms = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
