/// Configuration management for the LearnHub server
use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Token signing configuration
///
/// Access and refresh tokens are signed with distinct secrets so a
/// compromise of one token class cannot forge the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
}

/// Billing provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    /// Maximum age of a signed webhook timestamp before it is rejected
    pub webhook_tolerance_secs: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ApiResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("LEARNHUB_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("LEARNHUB_PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse()
            .map_err(|_| ApiError::Validation("Invalid port number".to_string()))?;
        let version = env::var("LEARNHUB_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("LEARNHUB_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("LEARNHUB_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("learnhub.sqlite"));

        let access_token_secret = env::var("LEARNHUB_ACCESS_TOKEN_SECRET")
            .map_err(|_| ApiError::Validation("Access token secret required".to_string()))?;
        let refresh_token_secret = env::var("LEARNHUB_REFRESH_TOKEN_SECRET")
            .map_err(|_| ApiError::Validation("Refresh token secret required".to_string()))?;
        let access_token_ttl_minutes = env::var("LEARNHUB_ACCESS_TOKEN_TTL_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .unwrap_or(15);
        let refresh_token_ttl_days = env::var("LEARNHUB_REFRESH_TOKEN_TTL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        let billing_api_base = env::var("LEARNHUB_BILLING_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());
        let billing_secret_key = env::var("LEARNHUB_BILLING_SECRET_KEY")
            .map_err(|_| ApiError::Validation("Billing secret key required".to_string()))?;
        let webhook_secret = env::var("LEARNHUB_BILLING_WEBHOOK_SECRET")
            .map_err(|_| ApiError::Validation("Billing webhook secret required".to_string()))?;
        let webhook_tolerance_secs = env::var("LEARNHUB_BILLING_WEBHOOK_TOLERANCE_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            auth: AuthConfig {
                access_token_secret,
                refresh_token_secret,
                access_token_ttl_minutes,
                refresh_token_ttl_days,
            },
            billing: BillingConfig {
                api_base: billing_api_base,
                secret_key: billing_secret_key,
                webhook_secret,
                webhook_tolerance_secs,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ApiResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ApiError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.auth.access_token_secret.len() < 32 {
            return Err(ApiError::Validation(
                "Access token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.auth.refresh_token_secret.len() < 32 {
            return Err(ApiError::Validation(
                "Refresh token secret must be at least 32 characters".to_string(),
            ));
        }

        if self.auth.access_token_secret == self.auth.refresh_token_secret {
            return Err(ApiError::Validation(
                "Access and refresh token secrets must differ".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 4000,
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                database: PathBuf::from(":memory:"),
            },
            auth: AuthConfig {
                access_token_secret: "a".repeat(32),
                refresh_token_secret: "b".repeat(32),
                access_token_ttl_minutes: 15,
                refresh_token_ttl_days: 7,
            },
            billing: BillingConfig {
                api_base: "https://api.stripe.com".to_string(),
                secret_key: "sk_test_123".to_string(),
                webhook_secret: "whsec_test".to_string(),
                webhook_tolerance_secs: 300,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = base_config();
        config.auth.access_token_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_identical_secrets_rejected() {
        let mut config = base_config();
        config.auth.refresh_token_secret = config.auth.access_token_secret.clone();
        assert!(config.validate().is_err());
    }
}
