//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

use crate::fraud::FraudConfig;
use crate::helpers::cipher::MIN_KEY_LENGTH;
use crate::payments::factory::PaymentFactoryConfig;
use crate::services::payment_orchestrator::OrchestratorConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub payments: PaymentFactoryConfig,
    pub orchestrator: OrchestratorConfig,
    pub fraud: FraudConfig,
    pub security: SecurityConfig,
    pub ussd: UssdConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Secrets used for data at rest
#[derive(Clone)]
pub struct SecurityConfig {
    pub encryption_key: String,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("encryption_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct UssdConfig {
    pub cleanup_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payments: PaymentFactoryConfig::from_env()
                .map_err(|e| ConfigError::InvalidValue(e.to_string()))?,
            orchestrator: OrchestratorConfig::from_env(),
            fraud: FraudConfig::from_env(),
            security: SecurityConfig::from_env()?,
            ussd: UssdConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.security.validate()?;

        if self.payments.enabled_providers.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "ENABLED_PAYMENT_PROVIDERS must name at least one provider".to_string(),
            ));
        }
        if !self
            .payments
            .enabled_providers
            .contains(&self.payments.default_provider)
        {
            return Err(ConfigError::ValidationFailed(format!(
                "default provider {} is not enabled",
                self.payments.default_provider
            )));
        }
        if self.fraud.risk_score_threshold > 100 {
            return Err(ConfigError::InvalidValue(
                "RISK_SCORE_THRESHOLD must be between 0 and 100".to_string(),
            ));
        }
        if self.orchestrator.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("PAYMENT_MAX_RETRIES".to_string()));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                "plain" | "pretty" | "text" => LogFormat::Plain,
                other => {
                    return Err(ConfigError::InvalidValue(format!("LOG_FORMAT={}", other)))
                }
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SecurityConfig {
            encryption_key: env::var("ENCRYPTION_KEY")
                .map_err(|_| ConfigError::MissingVariable("ENCRYPTION_KEY".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encryption_key.len() < MIN_KEY_LENGTH {
            return Err(ConfigError::ValidationFailed(format!(
                "ENCRYPTION_KEY must be at least {} characters",
                MIN_KEY_LENGTH
            )));
        }
        Ok(())
    }
}

impl UssdConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(UssdConfig {
            cleanup_interval_secs: env::var("USSD_CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<std::num::ParseIntError> for ConfigError {
    fn from(_: std::num::ParseIntError) -> Self {
        ConfigError::InvalidValue("Failed to parse integer value".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_encryption_key_is_rejected() {
        let config = SecurityConfig {
            encryption_key: "too-short".to_string(),
        };
        assert!(config.validate().is_err());

        let config = SecurityConfig {
            encryption_key: "k".repeat(MIN_KEY_LENGTH),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_level_validation() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_err());
    }
}
