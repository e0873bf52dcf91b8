use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    pub provider: ProviderConfig,
    pub network: NetworkConfig,
    pub telegram: TelegramConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Settings for the availability loop.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Host whose reachability stands in for "the power is on".
    pub host: String,
    pub port: u16,
    /// Seconds between probe cycles.
    pub check_interval_secs: u64,
    /// Total window a cycle may spend confirming an outage.
    pub availability_window_secs: u64,
    /// Pause between failed probe attempts within the window.
    pub retry_gap_secs: u64,
    /// Timeout for a single probe attempt.
    pub probe_timeout_secs: u64,
    /// Pause before the next cycle after an unexpected error.
    pub error_backoff_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: "8.8.8.8".to_string(),
            port: 53,
            check_interval_secs: 60,
            availability_window_secs: 30,
            retry_gap_secs: 2,
            probe_timeout_secs: 5,
            error_backoff_secs: 5,
        }
    }
}

/// Settings for the outage schedule provider.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub region_id: u32,
    pub dso_id: u32,
    /// Subscriber group whose schedule applies to the monitored host.
    pub group_id: String,
    pub fetch_interval_secs: u64,
    /// Civil timezone of the schedule slots, e.g. "Europe/Kyiv".
    pub timezone: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.yasno.ua/api/blackout-service/public/shutdowns".to_string(),
            region_id: 1,
            dso_id: 1,
            group_id: "1".to_string(),
            fetch_interval_secs: 300,
            timezone: "Europe/Kyiv".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub api_base: String,
    pub token: String,
    pub chat_ids: Vec<i64>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            token: String::new(),
            chat_ids: Vec::new(),
        }
    }
}

/// Quiet hours during which notifications are delivered silently.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct NotificationConfig {
    pub quiet_start_hour: u32,
    pub quiet_end_hour: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            quiet_start_hour: 23,
            quiet_end_hour: 7,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present - production uses env vars directly)
        let _ = dotenvy::dotenv();

        // Read DATABASE_URL from environment (required)
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set (via .env file or environment variable)")?;

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("svitlomon");

        let builder = Config::builder()
            // 1. Load default values
            // Database (loaded from environment above)
            .set_default("database.url", database_url)?
            // Monitored host
            .set_default("monitor.host", "8.8.8.8")?
            .set_default("monitor.port", 53)?
            .set_default("monitor.check_interval_secs", 60)?
            .set_default("monitor.availability_window_secs", 30)?
            .set_default("monitor.retry_gap_secs", 2)?
            .set_default("monitor.probe_timeout_secs", 5)?
            .set_default("monitor.error_backoff_secs", 5)?
            // Schedule provider
            .set_default(
                "provider.base_url",
                "https://app.yasno.ua/api/blackout-service/public/shutdowns",
            )?
            .set_default("provider.region_id", 1)?
            .set_default("provider.dso_id", 1)?
            .set_default("provider.group_id", "1")?
            .set_default("provider.fetch_interval_secs", 300)?
            .set_default("provider.timezone", "Europe/Kyiv")?
            // Network
            .set_default("network.request_timeout_secs", 30)?
            .set_default("network.connect_timeout_secs", 10)?
            // Telegram
            .set_default("telegram.api_base", "https://api.telegram.org")?
            .set_default("telegram.token", "")?
            .set_default("telegram.chat_ids", Vec::<i64>::new())?
            // Notifications
            .set_default("notifications.quiet_start_hour", 23)?
            .set_default("notifications.quiet_end_hour", 7)?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // 4. Load from Environment variables (SVITLOMON__MONITOR__HOST=...)
            .add_source(Environment::with_prefix("SVITLOMON").separator("__"));

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }

    /// Startup validation. Any failure here is fatal, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.host.trim().is_empty() {
            anyhow::bail!("monitor.host must not be empty");
        }
        if self.monitor.port == 0 {
            anyhow::bail!("monitor.port must not be zero");
        }
        if self.monitor.check_interval_secs == 0 {
            anyhow::bail!("monitor.check_interval_secs must be positive");
        }
        if self.monitor.availability_window_secs == 0 {
            anyhow::bail!("monitor.availability_window_secs must be positive");
        }
        if self.monitor.retry_gap_secs == 0 {
            anyhow::bail!("monitor.retry_gap_secs must be positive");
        }
        if self.monitor.retry_gap_secs > self.monitor.availability_window_secs {
            anyhow::bail!(
                "monitor.retry_gap_secs ({}) must not exceed monitor.availability_window_secs ({})",
                self.monitor.retry_gap_secs,
                self.monitor.availability_window_secs
            );
        }
        if self.provider.fetch_interval_secs == 0 {
            anyhow::bail!("provider.fetch_interval_secs must be positive");
        }
        if self.notifications.quiet_start_hour >= 24 || self.notifications.quiet_end_hour >= 24 {
            anyhow::bail!("notification quiet hours must be in the range 0-23");
        }
        self.timezone()?;
        Ok(())
    }

    /// Parse the configured civil timezone.
    pub fn timezone(&self) -> Result<Tz> {
        self.provider
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid provider.timezone '{}': {e}", self.provider.timezone))
    }
}
