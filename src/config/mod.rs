//! Environment-driven configuration. Dev falls back to safe defaults;
//! prod requires every value to be set explicitly.

use anyhow::{anyhow, Result};
use std::env;

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
    /// Public base URL embedded in confirmation/reset links.
    pub base_url: String,
    pub jwt: JwtConfig,
    /// HMAC key for the federated login state value.
    pub federated_state_secret: String,
    pub allowed_origins: Vec<String>,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self> {
        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str.parse().map_err(|e: String| anyhow!(e))?;
        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            environment,
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            host: get_env("HOST", Some("0.0.0.0"), is_prod)?,
            port: get_env("PORT", Some("3000"), is_prod)?
                .parse()
                .map_err(|e: std::num::ParseIntError| anyhow!(e.to_string()))?,
            base_url: get_env("BASE_URL", Some("http://localhost:3000"), is_prod)?,
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", Some("dev-only-jwt-secret"), is_prod)?,
                access_token_expiry_minutes: get_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    Some("15"),
                    is_prod,
                )?
                .parse()
                .map_err(|e: std::num::ParseIntError| anyhow!(e.to_string()))?,
                refresh_token_expiry_days: get_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    Some("7"),
                    is_prod,
                )?
                .parse()
                .map_err(|e: std::num::ParseIntError| anyhow!(e.to_string()))?,
            },
            federated_state_secret: get_env(
                "FEDERATED_STATE_SECRET",
                Some("dev-only-state-secret"),
                is_prod,
            )?,
            allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("PORT must be greater than 0"));
        }
        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(anyhow!("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }
        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(anyhow!("JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"));
        }

        if self.environment == Environment::Prod {
            if self.allowed_origins.iter().any(|o| o == "*") {
                return Err(anyhow!("Wildcard CORS origin not allowed in production"));
            }
            if self.jwt.secret.starts_with("dev-only")
                || self.federated_state_secret.starts_with("dev-only")
            {
                return Err(anyhow!("dev-only secrets are not allowed in production"));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(anyhow!("{} is required in production but not set", key))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(anyhow!("{} is required but not set", key))
            }
        }
    }
}
