use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use site_monitor::MonitorConfig;

/// Daemon configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// `DATABASE_URL`, default `sqlite://site-monitor.db?mode=rwc`
    pub database_url: String,
    /// `PLUGIN_DIR`, default `plugins`
    pub plugin_dir: PathBuf,
    /// `DEFAULT_PLUGIN_DIR`, default `plugins_default`; copied into an empty
    /// plugin directory on startup
    pub default_plugin_dir: PathBuf,
    /// `TICK_SECONDS`, default 30
    pub tick_seconds: u64,
    /// `FETCH_TIMEOUT_SECONDS`, default 10
    pub fetch_timeout_seconds: u64,
    /// `NOTIFY_TIMEOUT_SECONDS`, default 10
    pub notify_timeout_seconds: u64,
    /// `MAX_CONCURRENT_CHECKS`, default 4
    pub max_concurrent_checks: usize,
    /// `NOTIFY_ON_FIRST_SEEN`, default `false`: a hash site's first hash
    /// establishes state and is not announced
    pub notify_on_first_seen: bool,
    /// `NOTIFY_WEBHOOK_URL`; notifications are only logged when unset
    pub notify_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            database_url: var("DATABASE_URL", "sqlite://site-monitor.db?mode=rwc"),
            plugin_dir: var("PLUGIN_DIR", "plugins").into(),
            default_plugin_dir: var("DEFAULT_PLUGIN_DIR", "plugins_default").into(),
            tick_seconds: var("TICK_SECONDS", "30")
                .parse()
                .context("TICK_SECONDS must be a valid number")?,
            fetch_timeout_seconds: var("FETCH_TIMEOUT_SECONDS", "10")
                .parse()
                .context("FETCH_TIMEOUT_SECONDS must be a valid number")?,
            notify_timeout_seconds: var("NOTIFY_TIMEOUT_SECONDS", "10")
                .parse()
                .context("NOTIFY_TIMEOUT_SECONDS must be a valid number")?,
            max_concurrent_checks: var("MAX_CONCURRENT_CHECKS", "4")
                .parse()
                .context("MAX_CONCURRENT_CHECKS must be a valid number")?,
            notify_on_first_seen: var("NOTIFY_ON_FIRST_SEEN", "false")
                .parse()
                .context("NOTIFY_ON_FIRST_SEEN must be true or false")?,
            notify_webhook_url: lookup("NOTIFY_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .with_tick_interval(Duration::from_secs(self.tick_seconds.max(1)))
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout_seconds.max(1)))
            .with_notify_timeout(Duration::from_secs(self.notify_timeout_seconds.max(1)))
            .with_max_concurrent_checks(self.max_concurrent_checks)
            .with_notify_on_first_seen(self.notify_on_first_seen)
    }
}
