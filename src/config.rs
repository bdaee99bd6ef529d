use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub db_path: String,
    pub engine: EngineConfig,
    pub retention: RetentionConfig,
}

/// Alert engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between evaluation ticks
    pub tick_interval: Duration,
    /// Minimum spacing between two firings of the same rule.
    /// None disables the gate: two consecutive over-threshold ticks
    /// produce two alert instances.
    pub cooldown: Option<Duration>,
}

/// Retention manager configuration
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Master switch for the background sweeper
    pub enabled: bool,
    /// Row cap; 0 disables the count policy
    pub max_logs: u64,
    /// Age cap; rows with timestamp older than now - max_age are deleted
    pub max_age: Option<Duration>,
    /// Size trigger in megabytes; 0 disables it
    pub max_size_mb: u64,
    /// Interval between policy checks
    pub check_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("PEEP_DB_PATH").unwrap_or_else(|_| "peep.db".to_string()),
            engine: EngineConfig::from_env(),
            retention: RetentionConfig::from_env(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let tick_secs: u64 = env::var("PEEP_TICK_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        // a zero interval would make the ticker spin
        let tick_secs = tick_secs.max(1);

        // A duration string like "5m"; absent or unparsable means disabled.
        let cooldown = env::var("PEEP_ALERT_COOLDOWN")
            .ok()
            .and_then(|v| humantime::parse_duration(&v).ok())
            .filter(|d| !d.is_zero());

        Self {
            tick_interval: Duration::from_secs(tick_secs),
            cooldown,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            cooldown: None,
        }
    }
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env::var("PEEP_RETENTION_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            max_logs: env::var("PEEP_RETENTION_MAX_LOGS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            max_age: env::var("PEEP_RETENTION_MAX_AGE")
                .ok()
                .and_then(|v| humantime::parse_duration(&v).ok())
                .filter(|d| !d.is_zero()),
            max_size_mb: env::var("PEEP_RETENTION_MAX_SIZE_MB")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            check_interval: Duration::from_secs(
                env::var("PEEP_RETENTION_CHECK_INTERVAL_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .unwrap_or(600u64)
                    .max(1),
            ),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_logs: 0,
            max_age: None,
            max_size_mb: 0,
            check_interval: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert!(config.cooldown.is_none());
    }

    #[test]
    fn test_retention_config_defaults() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_logs, 0);
        assert!(config.max_age.is_none());
        assert_eq!(config.check_interval, Duration::from_secs(600));
    }
}
