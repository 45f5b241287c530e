//! Configuration loading (§10.4). A TOML file supplies the base
//! configuration; `RESIZR_`-prefixed environment variables (loaded via
//! `envy`) override individual fields, matching how the teacher's daemon
//! layers a config file under environment-driven deployment knobs.

use std::collections::HashMap;

use serde::Deserialize;

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_key_header() -> String {
    "X-Api-Key".to_string()
}
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_quality() -> u8 {
    85
}
fn default_max_width() -> u32 {
    8192
}
fn default_max_height() -> u32 {
    8192
}
fn default_thumbnail_size() -> u32 {
    150
}

/// Rate limits, in requests-per-minute, for each route class of §4.7.
/// `0` disables limiting for that class.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rl_upload")]
    pub upload_per_minute: u32,
    #[serde(default = "default_rl_download")]
    pub download_per_minute: u32,
    #[serde(default = "default_rl_info")]
    pub info_per_minute: u32,
}
fn default_rl_upload() -> u32 {
    30
}
fn default_rl_download() -> u32 {
    300
}
fn default_rl_info() -> u32 {
    600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            upload_per_minute: default_rl_upload(),
            download_per_minute: default_rl_download(),
            info_per_minute: default_rl_info(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub path_style: bool,
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    pub metadata_store_url: String,
    pub object_store: ObjectStoreConfig,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default)]
    pub read_write_keys: Vec<String>,
    #[serde(default)]
    pub read_only_keys: Vec<String>,
    #[serde(default = "default_key_header")]
    pub key_header: String,

    pub tls: Option<TlsConfig>,

    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}
fn default_log_format() -> String {
    "compact".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Environment-variable overrides, deserialized with `envy` under the
/// `RESIZR_` prefix. Every field is optional: only present variables
/// override the file-loaded configuration.
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    bind_addr: Option<String>,
    metadata_store_url: Option<String>,
    max_file_size: Option<u64>,
    quality: Option<u8>,
    max_width: Option<u32>,
    max_height: Option<u32>,
    auth_enabled: Option<bool>,
    key_header: Option<String>,
    log_format: Option<String>,
    log_level: Option<String>,
    object_store_endpoint: Option<String>,
    object_store_bucket: Option<String>,
    object_store_access_key: Option<String>,
    object_store_secret_key: Option<String>,
}

impl Config {
    /// Loads the base configuration from a TOML file at `path`, then layers
    /// `RESIZR_*` environment variables on top.
    pub fn load(path: Option<&std::path::Path>) -> Result<Config, crate::Error> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| crate::Error::Internal(format!("reading {:?}: {}", path, e)))?;
                toml::from_str::<Config>(&text)
                    .map_err(|e| crate::Error::Internal(format!("parsing {:?}: {}", path, e)))?
            }
            None => Config::from_env_only()?,
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Builds a `Config` purely from environment variables, used when no
    /// config file is given (`RESIZR_METADATA_STORE_URL` etc. are then
    /// mandatory).
    fn from_env_only() -> Result<Config, crate::Error> {
        let raw: HashMap<String, String> = std::env::vars().collect();
        envy::prefixed("RESIZR_")
            .from_iter(raw)
            .map_err(|e| crate::Error::Internal(format!("loading config from env: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<(), crate::Error> {
        let overrides: EnvOverrides = envy::prefixed("RESIZR_")
            .from_env()
            .map_err(|e| crate::Error::Internal(format!("parsing env overrides: {}", e)))?;

        if let Some(v) = overrides.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = overrides.metadata_store_url {
            self.metadata_store_url = v;
        }
        if let Some(v) = overrides.max_file_size {
            self.max_file_size = v;
        }
        if let Some(v) = overrides.quality {
            self.quality = v;
        }
        if let Some(v) = overrides.max_width {
            self.max_width = v;
        }
        if let Some(v) = overrides.max_height {
            self.max_height = v;
        }
        if let Some(v) = overrides.auth_enabled {
            self.auth_enabled = v;
        }
        if let Some(v) = overrides.key_header {
            self.key_header = v;
        }
        if let Some(v) = overrides.log_format {
            self.log_format = v;
        }
        if let Some(v) = overrides.log_level {
            self.log_level = v;
        }
        if let Some(v) = overrides.object_store_endpoint {
            self.object_store.endpoint = v;
        }
        if let Some(v) = overrides.object_store_bucket {
            self.object_store.bucket = v;
        }
        if let Some(v) = overrides.object_store_access_key {
            self.object_store.access_key = v;
        }
        if let Some(v) = overrides.object_store_secret_key {
            self.object_store.secret_key = v;
        }
        Ok(())
    }
}
