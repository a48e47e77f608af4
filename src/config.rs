use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub log_level: tracing::Level,
    pub db_pool_size: u32,
    /// `None` disables the background expiry sweep.
    pub sweep_interval: Option<Duration>,
    pub sweep_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        // empty values count as unset
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let sweep_interval_secs: u64 = parse_or(var("SWEEP_INTERVAL_SECS"), 86_400, "SWEEP_INTERVAL_SECS")?;

        Ok(Config {
            database_url,
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            log_level: parse_or(var("LOG_LEVEL"), tracing::Level::INFO, "LOG_LEVEL")?,
            db_pool_size: parse_or(var("DB_POOL_SIZE"), 10, "DB_POOL_SIZE")?,
            sweep_interval: (sweep_interval_secs > 0).then(|| Duration::from_secs(sweep_interval_secs)),
            sweep_on_startup: parse_or(var("SWEEP_ON_STARTUP"), false, "SWEEP_ON_STARTUP")?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, default: T, key: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/loyalty")]).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.log_level, tracing::Level::INFO);
        assert_eq!(config.db_pool_size, 10);
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(86_400)));
        assert!(!config.sweep_on_startup);
    }

    #[test]
    fn test_database_url_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("DATABASE_URL", "  ")]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://db/loyalty"),
            ("LOG_LEVEL", "debug"),
            ("SWEEP_INTERVAL_SECS", "0"),
            ("SWEEP_ON_STARTUP", "true"),
            ("DB_POOL_SIZE", "4"),
        ])
        .unwrap();
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.sweep_interval, None);
        assert!(config.sweep_on_startup);
        assert_eq!(config.db_pool_size, 4);
    }

    #[test]
    fn test_invalid_number() {
        let err = config(&[("DATABASE_URL", "postgres://db"), ("DB_POOL_SIZE", "many")]).unwrap_err();
        assert!(err.to_string().contains("DB_POOL_SIZE"));
    }
}
