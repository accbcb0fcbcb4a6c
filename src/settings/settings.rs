use std::time::Duration;

use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

use crate::auth::ApiConfig;
use crate::cache::CacheConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub api: Api,
    pub cache: Cache,
    pub store: Store,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Api {
    pub base_url: String,
    pub refresh_path: String,
    pub sign_in_path: String,
    pub refresh_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Cache {
    pub stale_time_ms: u64,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub backend: String, // "memory" or "file"
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

impl Api {
    pub fn to_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.base_url.clone(),
            refresh_path: self.refresh_path.clone(),
            sign_in_path: self.sign_in_path.clone(),
            refresh_timeout: Duration::from_millis(self.refresh_timeout_ms),
        }
    }
}

impl Cache {
    pub fn to_config(&self) -> CacheConfig {
        CacheConfig {
            stale_time: Duration::from_millis(self.stale_time_ms),
            max_retries: self.max_retries,
            initial_retry_delay: Duration::from_millis(self.initial_retry_delay_ms),
        }
    }
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
