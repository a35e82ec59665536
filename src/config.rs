//! Configuration management for the chunk relay server

use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub relay: RelayConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted `/chunk` request body
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Chunk storage root, one directory per upload
    pub uploads_dir: PathBuf,
    /// Assembled artifacts
    pub temp_dir: PathBuf,
    /// Keep chunks after a successful relay
    pub retain_chunks: bool,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub catbox_url: String,
    pub litterbox_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time before a session is reaped, within [`SESSION_TTL_HOURS_RANGE`]
    pub ttl_hours: i64,
    /// 0 disables the background reaper
    pub reaper_interval_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

pub const DEFAULT_CATBOX_URL: &str = "https://catbox.moe/user/api.php";
pub const DEFAULT_LITTERBOX_URL: &str = "https://litterbox.catbox.moe/resources/internals/api.php";

/// Accepted session TTLs: one hour up to one year
pub const SESSION_TTL_HOURS_RANGE: RangeInclusive<i64> = 1..=24 * 365;

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                max_chunk_bytes: 100 * 1024 * 1024,
            },
            storage: StorageConfig {
                uploads_dir: PathBuf::from("uploads"),
                temp_dir: PathBuf::from("temp"),
                retain_chunks: false,
            },
            relay: RelayConfig {
                catbox_url: DEFAULT_CATBOX_URL.to_string(),
                litterbox_url: DEFAULT_LITTERBOX_URL.to_string(),
                timeout_secs: 300,
            },
            sessions: SessionConfig {
                ttl_hours: 24,
                reaper_interval_secs: 300,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or(defaults.server.host),
                port: parsed(&lookup, "PORT", defaults.server.port)?,
                max_chunk_bytes: parsed(&lookup, "MAX_CHUNK_BYTES", defaults.server.max_chunk_bytes)?,
            },
            storage: StorageConfig {
                uploads_dir: lookup("UPLOADS_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.uploads_dir),
                temp_dir: lookup("TEMP_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.temp_dir),
                retain_chunks: flag(&lookup, "RETAIN_CHUNKS", defaults.storage.retain_chunks)?,
            },
            relay: RelayConfig {
                catbox_url: lookup("CATBOX_URL").unwrap_or(defaults.relay.catbox_url),
                litterbox_url: lookup("LITTERBOX_URL").unwrap_or(defaults.relay.litterbox_url),
                timeout_secs: parsed(&lookup, "RELAY_TIMEOUT_SECS", defaults.relay.timeout_secs)?,
            },
            sessions: SessionConfig {
                ttl_hours: bounded(
                    &lookup,
                    "SESSION_TTL_HOURS",
                    defaults.sessions.ttl_hours,
                    SESSION_TTL_HOURS_RANGE,
                )?,
                reaper_interval_secs: parsed(
                    &lookup,
                    "REAPER_INTERVAL_SECS",
                    defaults.sessions.reaper_interval_secs,
                )?,
            },
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn bounded<F, T>(
    lookup: &F,
    key: &'static str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + ToString,
{
    let value = parsed(lookup, key, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        },
        None => Ok(default),
    }
}
