//! Configuration management for the Tus server

use std::env;

use thiserror::Error;

use crate::tus::ExpirationPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub tus: TusConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Protocol settings
#[derive(Debug, Clone)]
pub struct TusConfig {
    /// Collection URL, uploads live at `{url_path}/{id}`
    pub url_path: String,
    /// Advertised as `Tus-Max-Size`
    pub max_size: Option<u64>,
    pub expiration: ExpirationPolicy,
    /// Serialize PATCH/DELETE per upload within this process
    pub enable_locking: bool,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

impl Default for TusConfig {
    fn default() -> Self {
        TusConfig {
            url_path: "/files".to_string(),
            max_size: None,
            expiration: ExpirationPolicy::None,
            enable_locking: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            tus: TusConfig::default(),
        }
    }
}

impl TusConfig {
    /// Location of an upload
    pub fn upload_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.url_path.trim_end_matches('/'), file_id)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let expiration_secs = match lookup("TUS_EXPIRATION_SECS") {
            Some(value) => value
                .parse::<i64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    name: "TUS_EXPIRATION_SECS",
                    value,
                })?,
            None => 3600,
        };

        let expiration = match lookup("TUS_EXPIRATION")
            .unwrap_or_else(|| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => ExpirationPolicy::None,
            "absolute" => ExpirationPolicy::absolute_secs(expiration_secs),
            "sliding" => ExpirationPolicy::sliding_secs(expiration_secs),
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "TUS_EXPIRATION",
                    value: other.to_string(),
                })
            }
        };

        let max_size = lookup("TUS_MAX_SIZE")
            .map(|value| {
                value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    name: "TUS_MAX_SIZE",
                    value,
                })
            })
            .transpose()?;

        let mut url_path = lookup("TUS_URL_PATH").unwrap_or_else(|| "/files".to_string());
        if !url_path.starts_with('/') {
            url_path.insert(0, '/');
        }
        let url_path = url_path.trim_end_matches('/').to_string();
        if url_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TUS_URL_PATH",
                value: "/".to_string(),
            });
        }

        Ok(Config {
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: lookup("SERVER_PORT")
                    .unwrap_or_else(|| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            tus: TusConfig {
                url_path,
                max_size,
                expiration,
                enable_locking: lookup("TUS_ENABLE_LOCKING")
                    .map(|value| !matches!(value.to_lowercase().as_str(), "0" | "false" | "no"))
                    .unwrap_or(true),
            },
        })
    }
}
