//! Application configuration loaded from environment variables.
//!
//! Fail-fast: required variables must be present and valid or startup aborts
//! with a clear message. Production mode refuses known-insecure placeholder
//! keys; development logs a warning and continues.

use std::env;
use thiserror::Error;

/// Default MASTER_ENCRYPTION_KEY: 64 hex '0' characters (development only).
pub const INSECURE_MASTER_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Application run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Development,
    Production,
    Test,
}

impl AppMode {
    /// Parse from the `APP_ENV` environment variable value.
    /// Defaults to `Development` if unset or unrecognized.
    #[must_use]
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            "development" | "dev" => Self::Development,
            other => {
                eprintln!("Unrecognized APP_ENV value '{other}', defaulting to development");
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingVar { var: String },

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Per-provider OAuth client credentials from the environment.
#[derive(Debug, Clone)]
pub struct ProviderCredentialsConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// 64-char hex master encryption key (version 1).
    pub master_encryption_key: String,
    pub broker_base_url: String,
    pub oauth_callback_url: String,
    pub app_mode: AppMode,
    pub rust_log: String,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_day: u32,
    /// Credentials found for known providers (`GMAIL_CLIENT_ID`, ...).
    pub providers: Vec<ProviderCredentialsConfig>,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_mode = AppMode::from_env_str(&env::var("APP_ENV").unwrap_or_default());

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "PORT".to_string(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            Err(_) => 8080,
        };

        let database_url = required("DATABASE_URL")?;

        let master_encryption_key = match env::var("MASTER_ENCRYPTION_KEY") {
            Ok(key) => key,
            Err(_) if !app_mode.is_production() => INSECURE_MASTER_KEY.to_string(),
            Err(_) => {
                return Err(ConfigError::MissingVar {
                    var: "MASTER_ENCRYPTION_KEY".to_string(),
                })
            }
        };
        if master_encryption_key.len() != 64
            || !master_encryption_key.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(ConfigError::InvalidValue {
                var: "MASTER_ENCRYPTION_KEY".to_string(),
                message: "expected 64 hex characters (32 bytes)".to_string(),
            });
        }

        let broker_base_url = env::var("BROKER_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));
        let oauth_callback_url = env::var("OAUTH_CALLBACK_URL")
            .unwrap_or_else(|_| format!("{broker_base_url}/v1/oauth/callback"));

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let rate_limit_per_minute = parse_or_default("RATE_LIMIT_PER_MINUTE", 60)?;
        let rate_limit_per_day = parse_or_default("RATE_LIMIT_PER_DAY", 1000)?;

        let mut providers = Vec::new();
        for name in ["gmail", "google-calendar"] {
            let prefix = name.to_uppercase().replace('-', "_");
            if let (Ok(client_id), Ok(client_secret)) = (
                env::var(format!("{prefix}_CLIENT_ID")),
                env::var(format!("{prefix}_CLIENT_SECRET")),
            ) {
                providers.push(ProviderCredentialsConfig {
                    name: name.to_string(),
                    client_id,
                    client_secret,
                });
            }
        }

        Ok(Self {
            host,
            port,
            database_url,
            master_encryption_key,
            broker_base_url,
            oauth_callback_url,
            app_mode,
            rust_log,
            rate_limit_per_minute,
            rate_limit_per_day,
            providers,
        })
    }

    /// Validate security-sensitive values.
    ///
    /// Returns warnings for insecure defaults in development; errors in
    /// production.
    pub fn validate_security(&self) -> Result<Vec<String>, Vec<String>> {
        let mut findings = Vec::new();

        if self.master_encryption_key == INSECURE_MASTER_KEY {
            findings.push(
                "MASTER_ENCRYPTION_KEY is the insecure development default".to_string(),
            );
        }
        if !self.broker_base_url.starts_with("https://")
            && self.app_mode.is_production()
        {
            findings.push("BROKER_BASE_URL is not https".to_string());
        }

        if self.app_mode.is_production() && !findings.is_empty() {
            Err(findings)
        } else {
            Ok(findings)
        }
    }
}

fn required(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar {
        var: var.to_string(),
    })
}

fn parse_or_default(var: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            message: format!("'{raw}' is not a valid number"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_mode_parsing() {
        assert_eq!(AppMode::from_env_str("production"), AppMode::Production);
        assert_eq!(AppMode::from_env_str("prod"), AppMode::Production);
        assert_eq!(AppMode::from_env_str("test"), AppMode::Test);
        assert_eq!(AppMode::from_env_str("dev"), AppMode::Development);
        assert_eq!(AppMode::from_env_str(""), AppMode::Development);
        assert_eq!(AppMode::from_env_str("staging"), AppMode::Development);
    }

    #[test]
    fn test_insecure_key_rejected_in_production() {
        let config = Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/linkhub".to_string(),
            master_encryption_key: INSECURE_MASTER_KEY.to_string(),
            broker_base_url: "https://broker.example.com".to_string(),
            oauth_callback_url: "https://broker.example.com/v1/oauth/callback".to_string(),
            app_mode: AppMode::Production,
            rust_log: "info".to_string(),
            rate_limit_per_minute: 60,
            rate_limit_per_day: 1000,
            providers: vec![],
        };

        assert!(config.validate_security().is_err());
    }

    #[test]
    fn test_insecure_key_warns_in_development() {
        let config = Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "postgres://localhost/linkhub".to_string(),
            master_encryption_key: INSECURE_MASTER_KEY.to_string(),
            broker_base_url: "http://localhost:8080".to_string(),
            oauth_callback_url: "http://localhost:8080/v1/oauth/callback".to_string(),
            app_mode: AppMode::Development,
            rust_log: "info".to_string(),
            rate_limit_per_minute: 60,
            rate_limit_per_day: 1000,
            providers: vec![],
        };

        let warnings = config.validate_security().unwrap();
        assert_eq!(warnings.len(), 1);
    }
}
