use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    /// IANA zone the club's session dates and times are expressed in.
    pub timezone: Tz,
    pub webhook_url: Option<Url>,
    pub webhook_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_generation_days: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // APP_AUTH_TOKEN, APP_WEBHOOK_URL, ...
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("timezone", "Asia/Riyadh")?
            .set_default("webhook_timeout_secs", 5)?
            .set_default("sweep_interval_secs", 3600)?
            .set_default("max_generation_days", 90)?
            .build()?;

        config.try_deserialize()
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
