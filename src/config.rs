use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::relay::rules::RelayRule;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// Relay rules in evaluation order
    #[serde(default, alias = "configs")]
    pub rules: Vec<RelayRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Cron expression for the background dedup sweep
    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,
    /// Optional cron expression for re-reading rules from disk
    #[serde(default)]
    pub reload_cron: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_window_secs: default_dedup_window_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            sweep_cron: default_sweep_cron(),
            reload_cron: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Platform id this bot's messages are tagged with
    #[serde(default = "default_telegram_platform")]
    pub platform: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

/// Outbound HTTP bridge for a platform without a native adapter.
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub platform: String,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_sweep_cron() -> String {
    "0 * * * * *".to_string()
}

fn default_telegram_platform() -> String {
    "tgBot".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8720".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid relay configuration")
    }

    /// Re-read only the rule list, for hot reloads.
    pub fn load_rules(path: &Path) -> Result<Vec<RelayRule>> {
        Ok(Self::load(path)?.rules)
    }

    pub fn enabled_rule_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }
}
