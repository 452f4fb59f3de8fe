use std::time::Duration;

use crate::error::{AppError, Result};

pub const DATABASE_URL: &str = "sqlite:stats.db";
pub const BIND_ADDR: &str = "0.0.0.0:8080";

/// Default short window: 10 minutes.
pub const DEFAULT_REPORT_WINDOW_SECS: u64 = 600;

/// Upper bound accepted for a per-request window override (7 days).
pub const MAX_REPORT_WINDOW_SECS: u64 = 7 * 24 * 3_600;

/// Endpoint values the report understands. Everything else is stored and ignored.
pub mod endpoints {
    pub const CHALLENGE: &str = "/challenge";
    pub const SOLUTION: &str = "/solution";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be 'sqlite' or 'memory', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub database_url: String,
    /// Pool bound (DB_MAX_CONNECTIONS)
    pub db_max_connections: u32,
    /// How long a request waits for a pooled connection (DB_ACQUIRE_TIMEOUT_SECS)
    pub db_acquire_timeout: Duration,
    /// Delay between startup connection attempts (DB_CONNECT_RETRY_SECS)
    pub db_connect_retry: Duration,
    /// Short aggregation window (REPORT_WINDOW_SECS)
    pub report_window: Duration,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let report_window_secs = parse_var("REPORT_WINDOW_SECS", DEFAULT_REPORT_WINDOW_SECS)?;
        if report_window_secs == 0 {
            return Err(AppError::Config(
                "REPORT_WINDOW_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            store_backend: std::env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "sqlite".to_string())
                .parse()?,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DATABASE_URL.to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 5)?,
            db_acquire_timeout: Duration::from_secs(parse_var("DB_ACQUIRE_TIMEOUT_SECS", 5)?),
            db_connect_retry: Duration::from_secs(parse_var("DB_CONNECT_RETRY_SECS", 3)?),
            report_window: Duration::from_secs(report_window_secs),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| BIND_ADDR.to_string()),
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} must be a valid number, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}
