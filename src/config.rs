// src/config.rs
use crate::auth::SessionSettings;
use crate::error::ConfigError;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub api_key: String,
    pub quote_url: String,
    pub session: SessionSettings,
}

impl Config {
    /// Reads the environment, after loading `.env` if one is present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        Ok(Config {
            bind_addr: parsed(&lookup, "FINANCE_BIND_ADDR", "127.0.0.1:3030")?,
            database_path: PathBuf::from(
                lookup("FINANCE_DATABASE").unwrap_or_else(|| "finance.db".to_string()),
            ),
            api_key: required("ALPHAVANTAGE_API_KEY")?,
            quote_url: lookup("ALPHAVANTAGE_URL")
                .unwrap_or_else(|| "https://www.alphavantage.co".to_string()),
            session: SessionSettings {
                secret: required("FINANCE_SESSION_SECRET")?,
                ttl_secs: parsed(&lookup, "FINANCE_SESSION_TTL_SECS", "86400")?,
                password_rounds: parsed(&lookup, "FINANCE_PASSWORD_ROUNDS", "600000")?,
            },
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let value = lookup(key).unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}
