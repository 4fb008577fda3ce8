use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::client::{Credentials, DEFAULT_TIMEOUT};
use crate::error::HmisError;

pub const DEFAULT_CONFIG_FILE: &str = "hmis.json";
pub const PASSWORD_ENV: &str = "DHIS2_PASSWORD";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub server_url: String,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub mappings_dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_ttl_hours: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub server_url: String,
    pub credentials: Credentials,
    pub cache_dir: Utf8PathBuf,
    pub mappings_dir: Option<Utf8PathBuf>,
    pub timeout: Duration,
    pub cache_ttl: Option<chrono::Duration>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HmisError> {
        let (config_path, content) = read_config_file(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HmisError::Config(format!("{}: {err}", config_path.display())))?;

        Self::resolve_config(config, std::env::var(PASSWORD_ENV).ok())
    }

    /// Only the cache directory. Server settings and credentials are not
    /// required, and a missing default config file means the default dir.
    pub fn resolve_cache_dir(path: Option<&str>) -> Result<Utf8PathBuf, HmisError> {
        let (config_path, content) = match read_config_file(path) {
            Ok(found) => found,
            Err(HmisError::MissingConfig) => return default_cache_dir(),
            Err(err) => return Err(err),
        };
        let settings: CacheSettings = serde_json::from_str(&content)
            .map_err(|err| HmisError::Config(format!("{}: {err}", config_path.display())))?;
        match settings.cache_dir {
            Some(dir) => Ok(Utf8PathBuf::from(dir)),
            None => default_cache_dir(),
        }
    }

    /// `env_password`, when set and non-blank, wins over the file.
    pub fn resolve_config(
        config: Config,
        env_password: Option<String>,
    ) -> Result<ResolvedConfig, HmisError> {
        let server_url = config.server_url.trim().to_string();
        if server_url.is_empty() {
            return Err(HmisError::Config("server_url must not be empty".to_string()));
        }
        if config.username.trim().is_empty() {
            return Err(HmisError::Config("username must not be empty".to_string()));
        }

        let password = env_password
            .filter(|password| !password.trim().is_empty())
            .or(config.password)
            .ok_or_else(|| {
                HmisError::Config(format!(
                    "no password in config file or {PASSWORD_ENV} environment variable"
                ))
            })?;

        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_dir()?,
        };

        let timeout = match config.timeout_secs {
            Some(0) => {
                return Err(HmisError::Config(
                    "timeout_secs must be greater than zero".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let cache_ttl = match config.cache_ttl_hours {
            Some(hours) if hours <= 0 => {
                return Err(HmisError::Config(
                    "cache_ttl_hours must be greater than zero".to_string(),
                ));
            }
            Some(hours) => Some(chrono::Duration::hours(hours)),
            None => None,
        };

        Ok(ResolvedConfig {
            server_url,
            credentials: Credentials::new(config.username.trim(), password),
            cache_dir,
            mappings_dir: config.mappings_dir.map(Utf8PathBuf::from),
            timeout,
            cache_ttl,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CacheSettings {
    #[serde(default)]
    cache_dir: Option<String>,
}

fn read_config_file(path: Option<&str>) -> Result<(PathBuf, String), HmisError> {
    let config_path = match path {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };

    if path.is_none() && !config_path.exists() {
        return Err(HmisError::MissingConfig);
    }

    let content =
        fs::read_to_string(&config_path).map_err(|_| HmisError::ConfigRead(config_path.clone()))?;
    Ok((config_path, content))
}

pub fn default_cache_dir() -> Result<Utf8PathBuf, HmisError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("hmis-metadata")).ok()
        })
        .ok_or_else(|| HmisError::Filesystem("unable to resolve cache directory".to_string()))
}
