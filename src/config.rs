use std::{fs, path::Path, path::PathBuf, time::Duration};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::aggregate::{MergeSettings, DEFAULT_EVENT_CAP};
use crate::calendar::DEFAULT_AFFILIATE_CODE;
use crate::utils;

pub const DEFAULT_API_BASE_URL: &str = "https://www.eventbriteapi.com/v3/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
    #[error("unknown time zone: {0}")]
    TimeZone(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    /// Public base URL of this service; the webhook callback hangs off it.
    pub site_url: Option<String>,
    pub bind_address: String,
    pub timezone: String,
    pub affiliate_code: String,
    pub enable_custom_events: bool,
    pub show_private_events: bool,
    pub cache_ttl_secs: u64,
    pub event_cap: usize,
    pub database_path: Option<PathBuf>,
    pub remove_webhook_on_shutdown: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            site_url: None,
            bind_address: "127.0.0.1:8080".to_string(),
            timezone: "UTC".to_string(),
            affiliate_code: DEFAULT_AFFILIATE_CODE.to_string(),
            enable_custom_events: true,
            show_private_events: false,
            cache_ttl_secs: 86_400,
            event_cap: DEFAULT_EVENT_CAP,
            database_path: None,
            remove_webhook_on_shutdown: false,
        }
    }
}

impl AppConfig {
    /// Reads `config.json` from the data directory, then applies env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = read_config(&utils::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("EVENTBRITE_API_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = lookup("EVENTBRITE_TOKEN") {
            self.api_token = Some(token);
        }
        if let Some(site) = lookup("EVENT_CALENDAR_SITE_URL") {
            self.site_url = Some(site);
        }
        if let Some(bind) = lookup("EVENT_CALENDAR_BIND") {
            self.bind_address = bind;
        }
        if let Some(tz) = lookup("EVENT_CALENDAR_TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(code) = lookup("EVENT_CALENDAR_AFFILIATE") {
            self.affiliate_code = code;
        }
        if let Some(path) = lookup("EVENT_CALENDAR_DB") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(ttl) = lookup("EVENT_CALENDAR_CACHE_TTL") {
            self.cache_ttl_secs = ttl.trim().parse().map_err(|_| ConfigError::Env {
                key: "EVENT_CALENDAR_CACHE_TTL",
                value: ttl,
            })?;
        }
        Ok(())
    }

    pub fn site_timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::TimeZone(self.timezone.clone()))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Where upstream should deliver change notifications, if a site URL is set.
    pub fn webhook_callback_url(&self) -> Option<String> {
        let site = self.site_url.as_deref()?.trim().trim_end_matches('/');
        if site.is_empty() {
            return None;
        }
        Some(format!("{site}/webhook"))
    }

    pub fn merge_settings(&self, tz: Tz) -> MergeSettings {
        MergeSettings {
            tz,
            event_cap: self.event_cap,
            enable_custom_events: self.enable_custom_events,
            show_private_events: self.show_private_events,
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        debug!(?path, "no config file, using defaults");
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
