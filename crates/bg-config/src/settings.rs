//! Process settings read from the environment
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RABBITMQ_HOST` | `localhost` | Broker host |
//! | `RABBITMQ_PORT` | `5672` | Broker port |
//! | `RABBITMQ_CONNECTION_ATTEMPTS` | `5` | Attempts at initial connect |
//! | `RABBITMQ_RETRY_DELAY` | `5` | Seconds between connect attempts |
//! | `S3_REGION` | - | Object storage region |
//! | `S3_BUCKET` | - | Object storage bucket |

use std::time::Duration;

use crate::{ConfigError, Result};

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Broker connection parameters, applied only at initial connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub connection_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            connection_attempts: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl BrokerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_or("RABBITMQ_HOST", &defaults.host),
            port: env_or_parse("RABBITMQ_PORT", defaults.port),
            connection_attempts: env_or_parse(
                "RABBITMQ_CONNECTION_ATTEMPTS",
                defaults.connection_attempts,
            )
            .max(1),
            retry_delay: Duration::from_secs(env_or_parse(
                "RABBITMQ_RETRY_DELAY",
                defaults.retry_delay.as_secs(),
            )),
        }
    }

    /// AMQP URI for the default vhost with the broker's default credentials
    pub fn uri(&self) -> String {
        format!("amqp://{}:{}/%2f", self.host, self.port)
    }
}

/// Object storage location for template archives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSettings {
    pub region: Option<String>,
    pub bucket: Option<String>,
}

impl StorageSettings {
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("S3_REGION").ok(),
            bucket: std::env::var("S3_BUCKET").ok(),
        }
    }

    pub fn require_bucket(&self) -> Result<&str> {
        self.bucket
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnv("S3_BUCKET".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_defaults() {
        let settings = BrokerSettings::default();

        assert_eq!(settings.uri(), "amqp://localhost:5672/%2f");
        assert_eq!(settings.connection_attempts, 5);
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_env_helpers_fall_back_when_unset() {
        assert_eq!(env_or_parse("BG_CONFIG_TEST_UNSET_PORT", 5672u16), 5672);
        assert_eq!(env_or("BG_CONFIG_TEST_UNSET_HOST", "localhost"), "localhost");
    }

    #[test]
    fn test_storage_requires_bucket() {
        let settings = StorageSettings::default();
        assert!(matches!(settings.require_bucket(), Err(ConfigError::MissingEnv(_))));

        let settings = StorageSettings {
            region: Some("eu-west-1".to_string()),
            bucket: Some("templates".to_string()),
        };
        assert_eq!(settings.require_bucket().unwrap(), "templates");
    }
}
