use serde::{Deserialize, Serialize};
use config::{Config, ConfigError, File};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub workspace: PathBuf,
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cron: CronConfig,
    pub dingtalk: Option<DingtalkConfig>,
    pub feishu: Option<FeishuConfig>,
    pub qq: Option<QqConfig>,
    pub wecom: Option<WecomConfig>,
    pub webchat: Option<WebchatConfig>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Port the admin/webchat gateway binds to.
    #[serde(default = "default_server_port")]
    pub port: u16,
    /// Bearer token required on the admin API when set; unset binds
    /// 127.0.0.1-only (see `mozi_server::Gateway::with_auth`).
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Shared HMAC-SHA256 secret verified against every inbound channel
    /// webhook. Falls back to `auth_token` when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Brave Search API key; when absent `web_search` is not registered.
    #[serde(default)]
    pub brave_api_key: Option<String>,
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            auth_token: None,
            webhook_secret: None,
            brave_api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CronConfig {
    /// Path to the durable job store file, `~` expanded against $HOME.
    #[serde(default = "default_cron_store_path")]
    pub store_path: PathBuf,
    /// Tick loop wake interval.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Channel the `last` sentinel resolves to.
    #[serde(default)]
    pub default_channel: Option<String>,
    /// Bound on how long `stop()` waits for in-flight executions to finish.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_cron_store_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".mozi/cron/jobs.json")
}

fn default_tick_interval_secs() -> u64 {
    1
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            store_path: default_cron_store_path(),
            tick_interval_secs: default_tick_interval_secs(),
            default_channel: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DingtalkConfig {
    pub webhook_url: String,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeishuConfig {
    pub webhook_url: String,
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QqConfig {
    pub app_id: String,
    pub app_secret: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WecomConfig {
    pub webhook_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebchatConfig {
    pub bind_port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentsConfig {
    pub default: AgentDefaultConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentDefaultConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
}

impl AppConfig {
    /// Ids of the channels with a config block present, in the closed-set order.
    pub fn configured_channels(&self) -> Vec<&'static str> {
        let mut channels = Vec::new();
        if self.dingtalk.is_some() {
            channels.push(crate::channel::CHANNEL_DINGTALK);
        }
        if self.feishu.is_some() {
            channels.push(crate::channel::CHANNEL_FEISHU);
        }
        if self.qq.is_some() {
            channels.push(crate::channel::CHANNEL_QQ);
        }
        if self.wecom.is_some() {
            channels.push(crate::channel::CHANNEL_WECOM);
        }
        if self.webchat.is_some() {
            channels.push(crate::channel::CHANNEL_WEBCHAT);
        }
        channels
    }

    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = if let Some(path) = custom_path {
            path
        } else {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home.join(".mozi/config.json")
        };

        let s = Config::builder()
            .add_source(File::from(config_path).required(true))
            .add_source(
                config::Environment::with_prefix("MOZI")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}
