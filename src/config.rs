//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub webhook: WebhookConfig,
    pub splits: SplitConfig,
    pub credentials_key: String,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
}

/// Public webhook base URL, handed to gateways at charge-creation time so they
/// know where to POST back.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub public_base_url: String,
}

/// Platform split-payment recipients, one per gateway family that supports them.
#[derive(Debug, Clone, Default)]
pub struct SplitConfig {
    pub paradise_store_id: Option<String>,
    pub platform_split_user_id: Option<String>,
    pub pushyn_split_account_id: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            webhook: WebhookConfig::from_env()?,
            splits: SplitConfig::from_env(),
            credentials_key: env::var("CREDENTIALS_KEY")
                .map_err(|_| ConfigError::Missing("CREDENTIALS_KEY".to_string()))?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.webhook.validate()?;
        if self.credentials_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "CREDENTIALS_KEY cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL".to_string()))?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            connection_timeout: env::var("DATABASE_CONNECTION_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            idle_timeout: env::var("DATABASE_IDLE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "DATABASE_URL cannot be empty".to_string(),
            ));
        }
        if self.max_connections == 0 || self.max_connections < self.min_connections {
            return Err(ConfigError::InvalidValue(
                "DATABASE_MAX_CONNECTIONS must be >= DATABASE_MIN_CONNECTIONS and > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .map_err(|_| ConfigError::Missing("REDIS_URL".to_string()))?,
            default_ttl: env::var("REDIS_DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
        })
    }
}

impl WebhookConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WebhookConfig {
            public_base_url: env::var("WEBHOOK_URL")
                .map_err(|_| ConfigError::Missing("WEBHOOK_URL".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.public_base_url.starts_with("http") {
            return Err(ConfigError::InvalidValue(
                "WEBHOOK_URL must be an absolute http(s) URL".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL a given gateway should POST its webhooks to.
    pub fn url_for(&self, webhook_path: &str) -> String {
        format!(
            "{}{}",
            self.public_base_url.trim_end_matches('/'),
            webhook_path
        )
    }
}

impl SplitConfig {
    pub fn from_env() -> Self {
        SplitConfig {
            paradise_store_id: env::var("PARADISE_STORE_ID").ok(),
            platform_split_user_id: env::var("PLATFORM_SPLIT_USER_ID").ok(),
            pushyn_split_account_id: env::var("PUSHYN_SPLIT_ACCOUNT_ID").ok(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_url_for_joins_without_double_slash() {
        let cfg = WebhookConfig {
            public_base_url: "https://pay.example.com/".to_string(),
        };
        assert_eq!(
            cfg.url_for("/webhook/payment/paradise"),
            "https://pay.example.com/webhook/payment/paradise"
        );
    }

    #[test]
    fn server_config_rejects_port_zero() {
        let cfg = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 0,
        };
        assert!(cfg.validate().is_err());
    }
}
