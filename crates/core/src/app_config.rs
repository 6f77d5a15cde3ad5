use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration trait for structures loaded from the environment
pub trait EnvConfig: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Environment enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testing" | "test" => Ok(Environment::Testing),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue {
                field: "environment".to_string(),
                value: s.to_string(),
                expected: "development, testing, or production".to_string(),
            }),
        }
    }
}

impl Environment {
    /// Whether technical error detail may be exposed in responses
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Application configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Database connectivity configuration
///
/// Everything the connection layer needs: target URI, pool sizing, the
/// timeout family, retry/reconnect policy, and health-check thresholds.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub db_name: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub server_selection_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub acquire_wait_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub health_check_interval: Duration,
    pub pool_warn_utilization: f64,
    pub pool_critical_utilization: f64,
    pub repl_lag_threshold: Duration,
    pub slow_op_threshold: Duration,
    pub force_substitute: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl EnvConfig for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let name = get_env_or_default("APP_NAME", "subtrack");
        let environment = Environment::from_str(&get_env_or_default("APP_ENV", "development"))?;
        let database = DatabaseConfig::from_env()?;
        let logging = LoggingConfig::from_env()?;

        Ok(AppConfig {
            name,
            environment,
            database,
            logging,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "name".to_string(),
                reason: "App name cannot be empty".to_string(),
            });
        }

        self.database.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}

impl EnvConfig for DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = get_env_required("DATABASE_URL")?;
        let db_name = get_env_or_default("DATABASE_NAME", "subtrack");

        Ok(DatabaseConfig {
            url,
            db_name,
            max_pool_size: parse_env("DB_MAX_POOL_SIZE", 10)?,
            min_pool_size: parse_env("DB_MIN_POOL_SIZE", 1)?,
            connect_timeout: parse_env_ms("DB_CONNECT_TIMEOUT_MS", 10_000)?,
            socket_timeout: parse_env_ms("DB_SOCKET_TIMEOUT_MS", 45_000)?,
            server_selection_timeout: parse_env_ms("DB_SERVER_SELECTION_TIMEOUT_MS", 5_000)?,
            max_retries: parse_env("DB_MAX_RETRIES", 3)?,
            retry_base_delay: parse_env_ms("DB_RETRY_BASE_DELAY_MS", 1_000)?,
            acquire_wait_timeout: parse_env_ms("DB_ACQUIRE_WAIT_TIMEOUT_MS", 15_000)?,
            max_reconnect_attempts: parse_env("DB_MAX_RECONNECT_ATTEMPTS", 5)?,
            health_check_interval: parse_env_ms("DB_HEALTH_CHECK_INTERVAL_MS", 30_000)?,
            pool_warn_utilization: parse_env("DB_POOL_WARN_UTILIZATION", 80.0)?,
            pool_critical_utilization: parse_env("DB_POOL_CRITICAL_UTILIZATION", 90.0)?,
            repl_lag_threshold: parse_env_ms("DB_REPL_LAG_THRESHOLD_MS", 10_000)?,
            slow_op_threshold: parse_env_ms("DB_SLOW_OP_THRESHOLD_MS", 1_000)?,
            force_substitute: parse_env_bool("DB_FORCE_SUBSTITUTE", false),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "url".to_string(),
                reason: "Database URL cannot be empty".to_string(),
            });
        }

        if self.db_name.is_empty() {
            return Err(ConfigError::ValidationFailed {
                field: "db_name".to_string(),
                reason: "Database name cannot be empty".to_string(),
            });
        }

        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::ValidationFailed {
                field: "min_pool_size".to_string(),
                reason: format!(
                    "min_pool_size ({}) cannot exceed max_pool_size ({})",
                    self.min_pool_size, self.max_pool_size
                ),
            });
        }

        if self.retry_base_delay.is_zero() {
            return Err(ConfigError::ValidationFailed {
                field: "retry_base_delay".to_string(),
                reason: "Retry base delay must be positive".to_string(),
            });
        }

        for (field, pct) in [
            ("pool_warn_utilization", self.pool_warn_utilization),
            ("pool_critical_utilization", self.pool_critical_utilization),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(ConfigError::ValidationFailed {
                    field: field.to_string(),
                    reason: format!("Utilization threshold must be 0-100, got {}", pct),
                });
            }
        }

        if self.pool_warn_utilization >= self.pool_critical_utilization {
            return Err(ConfigError::ValidationFailed {
                field: "pool_warn_utilization".to_string(),
                reason: format!(
                    "Warning threshold ({}) must be below critical threshold ({})",
                    self.pool_warn_utilization, self.pool_critical_utilization
                ),
            });
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://localhost:27017".to_string(),
            db_name: "subtrack".to_string(),
            max_pool_size: 10,
            min_pool_size: 1,
            connect_timeout: Duration::from_millis(10_000),
            socket_timeout: Duration::from_millis(45_000),
            server_selection_timeout: Duration::from_millis(5_000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1_000),
            acquire_wait_timeout: Duration::from_millis(15_000),
            max_reconnect_attempts: 5,
            health_check_interval: Duration::from_millis(30_000),
            pool_warn_utilization: 80.0,
            pool_critical_utilization: 90.0,
            repl_lag_threshold: Duration::from_millis(10_000),
            slow_op_threshold: Duration::from_millis(1_000),
            force_substitute: false,
        }
    }
}

impl EnvConfig for LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: get_env_or_default("LOG_LEVEL", "info"),
            format: get_env_or_default("LOG_FORMAT", "compact"),
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "level".to_string(),
                value: self.level.clone(),
                expected: "trace, debug, info, warn, or error".to_string(),
            });
        }

        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "format".to_string(),
                value: self.format.clone(),
                expected: "compact, pretty, or json".to_string(),
            });
        }

        Ok(())
    }
}

// Helper functions for environment variable handling
fn get_env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar {
        var: key.to_string(),
    })
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw,
            expected: "a valid number".to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_ms(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_env(key, default_ms).map(Duration::from_millis)
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const DB_VARS: &[&str] = &[
        "DATABASE_URL",
        "DATABASE_NAME",
        "DB_MAX_POOL_SIZE",
        "DB_MIN_POOL_SIZE",
        "DB_CONNECT_TIMEOUT_MS",
        "DB_SOCKET_TIMEOUT_MS",
        "DB_SERVER_SELECTION_TIMEOUT_MS",
        "DB_MAX_RETRIES",
        "DB_RETRY_BASE_DELAY_MS",
        "DB_ACQUIRE_WAIT_TIMEOUT_MS",
        "DB_MAX_RECONNECT_ATTEMPTS",
        "DB_HEALTH_CHECK_INTERVAL_MS",
        "DB_POOL_WARN_UTILIZATION",
        "DB_POOL_CRITICAL_UTILIZATION",
        "DB_REPL_LAG_THRESHOLD_MS",
        "DB_SLOW_OP_THRESHOLD_MS",
        "DB_FORCE_SUBSTITUTE",
        "APP_NAME",
        "APP_ENV",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    fn clean_test_env() {
        for var in DB_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_database_config_defaults() {
        clean_test_env();
        env::set_var("DATABASE_URL", "mongodb://localhost:27017");

        let config = DatabaseConfig::from_env().unwrap();

        assert_eq!(config.url, "mongodb://localhost:27017");
        assert_eq!(config.db_name, "subtrack");
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.min_pool_size, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(1_000));
        assert_eq!(config.pool_warn_utilization, 80.0);
        assert_eq!(config.pool_critical_utilization, 90.0);
        assert!(!config.force_substitute);
        assert!(config.validate().is_ok());

        clean_test_env();
    }

    #[test]
    #[serial]
    fn test_database_config_from_env() {
        clean_test_env();
        env::set_var("DATABASE_URL", "mongodb://db.internal:27017");
        env::set_var("DATABASE_NAME", "subscriptions");
        env::set_var("DB_MAX_POOL_SIZE", "25");
        env::set_var("DB_MAX_RETRIES", "5");
        env::set_var("DB_RETRY_BASE_DELAY_MS", "250");
        env::set_var("DB_FORCE_SUBSTITUTE", "true");

        let config = DatabaseConfig::from_env().unwrap();

        assert_eq!(config.db_name, "subscriptions");
        assert_eq!(config.max_pool_size, 25);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_base_delay, Duration::from_millis(250));
        assert!(config.force_substitute);

        clean_test_env();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        clean_test_env();

        let result = DatabaseConfig::from_env();

        match result {
            Err(ConfigError::MissingEnvVar { var }) => assert_eq!(var, "DATABASE_URL"),
            other => panic!("Expected MissingEnvVar error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    #[serial]
    fn test_invalid_pool_size() {
        clean_test_env();
        env::set_var("DATABASE_URL", "mongodb://localhost:27017");
        env::set_var("DB_MAX_POOL_SIZE", "not-a-number");

        let result = DatabaseConfig::from_env();

        match result {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "DB_MAX_POOL_SIZE"),
            other => panic!("Expected InvalidValue error, got {:?}", other.map(|_| ())),
        }

        clean_test_env();
    }

    #[test]
    fn test_threshold_ordering_validation() {
        let config = DatabaseConfig {
            pool_warn_utilization: 95.0,
            pool_critical_utilization: 90.0,
            ..DatabaseConfig::default()
        };

        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::ValidationFailed { ref field, .. }) if field == "pool_warn_utilization"
        ));
    }

    #[test]
    fn test_pool_size_ordering_validation() {
        let config = DatabaseConfig {
            min_pool_size: 20,
            max_pool_size: 10,
            ..DatabaseConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_app_config_from_env() {
        clean_test_env();
        env::set_var("DATABASE_URL", "mongodb://localhost:27017");
        env::set_var("APP_NAME", "subtrack-test");
        env::set_var("APP_ENV", "testing");
        env::set_var("LOG_LEVEL", "debug");

        let config = AppConfig::from_env().unwrap();

        assert_eq!(config.name, "subtrack-test");
        assert_eq!(config.environment, Environment::Testing);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());

        clean_test_env();
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            Environment::from_str("development").unwrap(),
            Environment::Development
        );
        assert_eq!(Environment::from_str("dev").unwrap(), Environment::Development);
        assert_eq!(Environment::from_str("test").unwrap(), Environment::Testing);
        assert_eq!(
            Environment::from_str("prod").unwrap(),
            Environment::Production
        );
        assert!(Environment::from_str("staging").is_err());
    }

    #[test]
    fn test_environment_detail_exposure() {
        assert!(Environment::Development.is_development());
        assert!(!Environment::Production.is_development());
    }

    #[test]
    #[serial]
    fn test_invalid_log_level() {
        clean_test_env();
        env::set_var("LOG_LEVEL", "verbose");

        let config = LoggingConfig::from_env().unwrap();
        let result = config.validate();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "level"
        ));

        clean_test_env();
    }
}
