use std::{fmt, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

// The secret never shows up in logs, even through `{:?}`.
impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl_minutes", &self.ttl_minutes)
            .finish()
    }
}

/// Bounds applied to every record store call.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub max_connections: u32,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            timeout_ms: 5_000,
            retry_attempts: 2,
            retry_backoff_ms: 50,
        }
    }
}

pub const DEFAULT_REVOCATION_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Upper bound on revoked token ids held in memory.
    pub revocation_capacity: u64,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;

        let secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        anyhow::ensure!(!secret.trim().is_empty(), "JWT_SECRET must not be empty");

        let jwt = JwtConfig {
            secret,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "forum".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "forum-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60),
        };
        anyhow::ensure!(jwt.ttl_minutes > 0, "JWT_TTL_MINUTES must be positive");

        let revocation_capacity = env_or("REVOCATION_CAPACITY", DEFAULT_REVOCATION_CAPACITY);
        anyhow::ensure!(revocation_capacity > 0, "REVOCATION_CAPACITY must be positive");

        let defaults = StoreConfig::default();
        let store = StoreConfig {
            max_connections: env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            timeout_ms: env_or("STORE_TIMEOUT_MS", defaults.timeout_ms),
            retry_attempts: env_or("STORE_RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_backoff_ms: env_or("STORE_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
        };

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("APP_PORT", 8080),
            database_url,
            jwt,
            revocation_capacity,
            store,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secret() {
        let cfg = JwtConfig {
            secret: "super-secret-value".into(),
            issuer: "forum".into(),
            audience: "forum-users".into(),
            ttl_minutes: 60,
        };
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("super-secret-value"));
        assert!(printed.contains("<redacted>"));
        assert!(printed.contains("forum-users"));
    }

    #[test]
    fn store_durations() {
        let cfg = StoreConfig {
            timeout_ms: 250,
            retry_backoff_ms: 10,
            ..StoreConfig::default()
        };
        assert_eq!(cfg.timeout(), Duration::from_millis(250));
        assert_eq!(cfg.backoff(), Duration::from_millis(10));
    }

    #[test]
    fn listen_address_comes_from_env() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/forum");
        std::env::set_var("JWT_SECRET", "s3cret");
        std::env::set_var("APP_HOST", "127.0.0.1");
        std::env::set_var("APP_PORT", "9090");
        std::env::set_var("REVOCATION_CAPACITY", "500");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9090");
        assert_eq!(cfg.revocation_capacity, 500);
        assert_eq!(cfg.jwt.ttl_minutes, 60);
    }
}
