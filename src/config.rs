//! Environment-derived configuration, loaded once at startup.
//!
//! Mirrors the original `settings.py`'s `environs`-based loading: every
//! variable from spec.md §6 is represented here, required variables
//! fail fast (spec.md §7 "Config fatal"), optional ones carry the
//! documented defaults.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub valkey: ValkeyConfig,
    pub qrz: QrzConfig,
    pub telnet_username: String,
    pub cluster_csv_path: String,
    pub bands_csv_path: String,
    pub modes_json_path: String,
    pub prefixes_csv_path: String,
    pub http_addr: String,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub retention_days: i64,
}

impl PostgresConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db_name
        )
    }
}

#[derive(Debug, Clone)]
pub struct ValkeyConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub spot_expiration_secs: u64,
    pub geo_expiration_secs: u64,
}

impl ValkeyConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

#[derive(Debug, Clone)]
pub struct QrzConfig {
    pub user: String,
    pub password: String,
    pub api_key: String,
    pub refresh_interval: Duration,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name, v.clone())),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let postgres = PostgresConfig {
            user: required("POSTGRES_USER")?,
            password: required("POSTGRES_PASSWORD")?,
            host: required("POSTGRES_HOST")?,
            port: optional_parsed("POSTGRES_PORT", 5432)?,
            db_name: required("POSTGRES_DB_NAME")?,
            retention_days: optional_parsed("POSTGRES_DB_RETENTION_DAYS", 14)?,
        };

        let valkey = ValkeyConfig {
            host: required("VALKEY_HOST")?,
            port: optional_parsed("VALKEY_PORT", 6379)?,
            db: optional_parsed("VALKEY_DB", 0)?,
            spot_expiration_secs: optional_parsed("VALKEY_SPOT_EXPIRATION", 60)?,
            geo_expiration_secs: optional_parsed("VALKEY_GEO_EXPIRATION", 3600)?,
        };

        let qrz = QrzConfig {
            user: required("QRZ_USER")?,
            password: required("QRZ_PASSWORD")?,
            api_key: required("QRZ_API_KEY")?,
            refresh_interval: Duration::from_secs(optional_parsed("QRZ_SESSION_KEY_REFRESH", 3600)?),
        };

        let telnet_username = required("USERNAME_FOR_TELNET_CLUSTERS")?;

        Ok(Config {
            postgres,
            valkey,
            qrz,
            telnet_username,
            cluster_csv_path: optional("CLUSTERS_CSV_PATH", "data/clusters.csv"),
            bands_csv_path: optional("BANDS_CSV_PATH", "data/bands.csv"),
            modes_json_path: optional("MODES_JSON_PATH", "data/modes.json"),
            prefixes_csv_path: optional("PREFIXES_CSV_PATH", "data/prefixes.csv"),
            http_addr: optional("HTTP_ADDR", "0.0.0.0:8000"),
        })
    }
}
