// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for launchpad-environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file for the rocket inventory (in-memory when unset)
    pub database_path: Option<PathBuf>,
    /// Number of idle rockets kept warm
    pub pool_size: usize,
    /// Image used for new execution units
    pub base_image: String,
    /// Application port inside the unit
    pub app_port: u16,
    /// Application directory inside the unit
    pub app_dir: String,
    /// Local staging root for checkouts
    pub staging_dir: PathBuf,
    /// Suffix for mission hostnames
    pub base_domain: String,
    /// Explicit npm registry; disables the mirror fallback when set
    pub npm_registry: Option<String>,
    /// Fallback npm mirror
    pub npm_mirror: String,
    /// How long a mission stays in flight before it is recycled
    pub mission_ttl: Duration,
    /// Stats poll period
    pub stats_interval: Duration,
    /// Pool maintainer period
    pub maintenance_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: 2,
            base_image: "node:20-alpine".to_string(),
            app_port: 3000,
            app_dir: "/app".to_string(),
            staging_dir: std::env::temp_dir().join("launchpad"),
            base_domain: "preview.localhost".to_string(),
            npm_registry: None,
            npm_mirror: "https://registry.npmmirror.com".to_string(),
            mission_ttl: Duration::from_secs(600),        // 10 minutes
            stats_interval: Duration::from_secs(5),
            maintenance_interval: Duration::from_secs(60), // 1 minute
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app_dir = var("LAUNCHPAD_APP_DIR").unwrap_or(defaults.app_dir);
        if !app_dir.starts_with('/') {
            return Err(ConfigError::Invalid(
                "LAUNCHPAD_APP_DIR",
                format!("'{app_dir}' is not an absolute path"),
            ));
        }

        let app_port: u16 = parse(&var, "LAUNCHPAD_APP_PORT", defaults.app_port)?;
        if app_port == 0 {
            return Err(ConfigError::Invalid(
                "LAUNCHPAD_APP_PORT",
                "port must be non-zero".to_string(),
            ));
        }

        let base_domain = var("LAUNCHPAD_BASE_DOMAIN")
            .map(|d| d.trim().trim_matches('.').to_ascii_lowercase())
            .unwrap_or(defaults.base_domain);

        Ok(Self {
            database_path: var("LAUNCHPAD_DATABASE_PATH").map(PathBuf::from),
            pool_size: parse(&var, "LAUNCHPAD_POOL_SIZE", defaults.pool_size)?,
            base_image: var("LAUNCHPAD_BASE_IMAGE").unwrap_or(defaults.base_image),
            app_port,
            app_dir,
            staging_dir: var("LAUNCHPAD_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            base_domain,
            npm_registry: var("LAUNCHPAD_NPM_REGISTRY"),
            npm_mirror: var("LAUNCHPAD_NPM_MIRROR").unwrap_or(defaults.npm_mirror),
            mission_ttl: seconds(&var, "LAUNCHPAD_MISSION_TTL_SECS", defaults.mission_ttl)?,
            stats_interval: seconds(&var, "LAUNCHPAD_STATS_INTERVAL_SECS", defaults.stats_interval)?,
            maintenance_interval: seconds(
                &var,
                "LAUNCHPAD_MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval,
            )?,
        })
    }
}

fn parse<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn seconds<F>(var: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse(var, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid(key, "must be at least 1 second".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an unusable value.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
