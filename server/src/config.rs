use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;
const DEFAULT_UNCLAIMED_ROOM_TTL_SECS: u64 = 300;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host (default: 0.0.0.0)
    pub host: String,
    /// Bind port (default: 3001)
    pub port: u16,
    /// Directory uploaded media is written to and served from (default: ./uploads)
    pub upload_dir: PathBuf,
    /// Largest accepted upload body (default: 1 GiB)
    pub max_upload_bytes: usize,
    /// How long a created room may sit without members (default: 300s)
    pub unclaimed_room_ttl: Duration,
    /// Restrict sync-complete to the room creator (default: true)
    pub enforce_creator_sync: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(&lookup, "PORT", DEFAULT_PORT)?,
            upload_dir: PathBuf::from(lookup("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string())),
            max_upload_bytes: parse_var(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            unclaimed_room_ttl: Duration::from_secs(parse_var(
                &lookup,
                "UNCLAIMED_ROOM_TTL_SECS",
                DEFAULT_UNCLAIMED_ROOM_TTL_SECS,
            )?),
            enforce_creator_sync: parse_flag(&lookup, "ENFORCE_CREATOR_SYNC", true)?,
        })
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { name, value }),
        },
        None => Ok(default),
    }
}
