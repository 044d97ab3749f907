use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How edited posts are rendered by Telegram.
///
/// The rewrite always emits HTML tags, so only `html` (or `none` for a
/// plain-text bot) passes validation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParseModeConfig {
    #[default]
    Html,
    Markdownv2,
    None,
}

/// How a post's chat is mapped to a binding
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
    /// One binding per channel, stored in the `channels` table
    #[default]
    Multi,
    /// One global settings row for the whole deployment
    Single,
}

impl std::fmt::Display for BindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingMode::Multi => write!(f, "multi"),
            BindingMode::Single => write!(f, "single"),
        }
    }
}

impl std::str::FromStr for BindingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "multi" => Ok(BindingMode::Multi),
            "single" => Ok(BindingMode::Single),
            other => Err(format!(
                "unknown binding mode '{}' (expected multi or single)",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_database_config")]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub binding: BindingConfig,
    #[serde(default = "default_gateway_config")]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub parse_mode: ParseModeConfig,
    /// Receive updates through a webhook instead of long polling
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Public URL registered with Telegram
    pub url: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Expected value of the `X-Telegram-Bot-Api-Secret-Token` header
    #[serde(default)]
    pub secret: Option<String>,
}

impl WebhookConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid webhook listen address: {}", self.listen))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BindingConfig {
    #[serde(default)]
    pub mode: BindingMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_edit_timeout_secs")]
    pub edit_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn edit_timeout(&self) -> Duration {
        Duration::from_secs(self.edit_timeout_secs)
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("postlinker.db")
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_edit_timeout_secs() -> u64 {
    10
}

fn default_database_config() -> DatabaseConfig {
    DatabaseConfig {
        path: default_db_path(),
    }
}

fn default_gateway_config() -> GatewayConfig {
    GatewayConfig {
        edit_timeout_secs: default_edit_timeout_secs(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token must not be empty");
        }
        if self.telegram.parse_mode == ParseModeConfig::Markdownv2 {
            bail!(
                "telegram.parse_mode = \"markdownv2\" is not supported; \
                 rewritten posts carry HTML tags, use \"html\""
            );
        }
        if self.gateway.edit_timeout_secs == 0 {
            bail!("gateway.edit_timeout_secs must be greater than zero");
        }
        if let Some(webhook) = &self.telegram.webhook {
            webhook.listen_addr()?;
            if webhook.url.is_empty() {
                bail!("telegram.webhook.url must not be empty");
            }
        }
        Ok(())
    }
}
