use crate::get_config_path;
use crate::verify::verify_api_key;
use anyhow::Result;
use inquire::{Confirm, Select, Text};
use mozi_core::config::{
    AgentDefaultConfig, AgentsConfig, AnthropicConfig, AppConfig, CronConfig, DingtalkConfig,
    FeishuConfig, ProviderConfig, ProvidersConfig, QqConfig, ServerConfig, WebchatConfig,
    WecomConfig,
};
use std::path::PathBuf;

/// Interactive first-run wizard. Writes `~/.mozi/config.json` (or the given
/// path) with just enough to boot the gateway: a workspace, one LLM
/// provider, and whichever IM channels the operator wants wired up.
pub async fn run_onboard(config_path: Option<PathBuf>) -> Result<()> {
    println!("mozi onboard\n");

    let workspace = Text::new("Workspace directory:")
        .with_default("~/.mozi/workspace")
        .prompt()?;
    let workspace = shellexpand_home(&workspace);
    std::fs::create_dir_all(&workspace)?;

    let providers = prompt_providers().await?;

    let model = Text::new("Default model:")
        .with_default(default_model_for(&providers))
        .prompt()?;
    let system_prompt = Text::new("System prompt:")
        .with_default("You are a helpful assistant operating scheduled jobs and channel messages.")
        .prompt()?;

    let agents = AgentsConfig {
        default: AgentDefaultConfig {
            model,
            system_prompt,
            max_tokens: 2048,
            temperature: 0.7,
        },
    };

    let cron = prompt_cron()?;
    let dingtalk = prompt_dingtalk()?;
    let feishu = prompt_feishu()?;
    let qq = prompt_qq()?;
    let wecom = prompt_wecom()?;
    let webchat = prompt_webchat()?;
    let server = prompt_server()?;

    let config = AppConfig {
        workspace,
        agents,
        providers,
        cron,
        dingtalk,
        feishu,
        qq,
        wecom,
        webchat,
        server,
    };

    let path = config_path.unwrap_or_else(get_config_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;

    println!("\nWrote config to {}", path.display());
    println!("Run 'mozi gateway' to start the scheduler and admin API.");
    Ok(())
}

fn shellexpand_home(input: &str) -> PathBuf {
    if let Some(rest) = input.strip_prefix("~/") {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(rest)
    } else {
        PathBuf::from(input)
    }
}

fn default_model_for(providers: &ProvidersConfig) -> &'static str {
    if providers.anthropic.is_some() {
        "claude-3-5-sonnet-20241022"
    } else {
        "gpt-4o-mini"
    }
}

async fn prompt_providers() -> Result<ProvidersConfig> {
    let choice = Select::new("LLM provider:", vec!["openai", "anthropic"]).prompt()?;

    let mut providers = ProvidersConfig::default();
    match choice {
        "openai" => {
            let api_key = Text::new("OpenAI API key:").prompt()?;
            let api_base = Text::new("OpenAI API base (blank for default):")
                .prompt_skippable()?
                .filter(|s: &String| !s.is_empty());
            if Confirm::new("Verify key now?").with_default(true).prompt()? {
                match verify_api_key("openai", &api_key, api_base.as_deref()).await {
                    Ok(msg) => println!("{}", msg),
                    Err(e) => println!("{}", e),
                }
            }
            providers.openai = Some(ProviderConfig {
                api_key,
                api_base,
                model: "gpt-4o-mini".to_string(),
            });
        }
        _ => {
            let api_key = Text::new("Anthropic API key:").prompt()?;
            if Confirm::new("Verify key now?").with_default(true).prompt()? {
                match verify_api_key("anthropic", &api_key, None).await {
                    Ok(msg) => println!("{}", msg),
                    Err(e) => println!("{}", e),
                }
            }
            providers.anthropic = Some(AnthropicConfig {
                api_key,
                model: "claude-3-5-sonnet-20241022".to_string(),
            });
        }
    }
    Ok(providers)
}

fn prompt_cron() -> Result<CronConfig> {
    let mut cron = CronConfig::default();
    if Confirm::new("Customize cron store path / tick interval?")
        .with_default(false)
        .prompt()?
    {
        let store_path = Text::new("Job store path:")
            .with_default(&cron.store_path.display().to_string())
            .prompt()?;
        cron.store_path = shellexpand_home(&store_path);
        let tick = Text::new("Tick interval (seconds):")
            .with_default(&cron.tick_interval_secs.to_string())
            .prompt()?;
        cron.tick_interval_secs = tick.parse().unwrap_or(cron.tick_interval_secs);
    }
    cron.default_channel = Text::new("Default channel for the 'last' sentinel (blank to skip):")
        .prompt_skippable()?
        .filter(|s: &String| !s.is_empty());
    Ok(cron)
}

fn prompt_dingtalk() -> Result<Option<DingtalkConfig>> {
    if !Confirm::new("Configure DingTalk?").with_default(false).prompt()? {
        return Ok(None);
    }
    let webhook_url = Text::new("DingTalk robot webhook URL:").prompt()?;
    let secret = Text::new("DingTalk signing secret (blank to skip):")
        .prompt_skippable()?
        .filter(|s: &String| !s.is_empty());
    Ok(Some(DingtalkConfig { webhook_url, secret }))
}

fn prompt_feishu() -> Result<Option<FeishuConfig>> {
    if !Confirm::new("Configure Feishu?").with_default(false).prompt()? {
        return Ok(None);
    }
    let webhook_url = Text::new("Feishu bot webhook URL:").prompt()?;
    let secret = Text::new("Feishu signing secret (blank to skip):")
        .prompt_skippable()?
        .filter(|s: &String| !s.is_empty());
    Ok(Some(FeishuConfig { webhook_url, secret }))
}

fn prompt_qq() -> Result<Option<QqConfig>> {
    if !Confirm::new("Configure QQ?").with_default(false).prompt()? {
        return Ok(None);
    }
    let app_id = Text::new("QQ app id:").prompt()?;
    let app_secret = Text::new("QQ app secret:").prompt()?;
    Ok(Some(QqConfig { app_id, app_secret }))
}

fn prompt_wecom() -> Result<Option<WecomConfig>> {
    if !Confirm::new("Configure WeCom?").with_default(false).prompt()? {
        return Ok(None);
    }
    let webhook_url = Text::new("WeCom group bot webhook URL:").prompt()?;
    Ok(Some(WecomConfig { webhook_url }))
}

fn prompt_webchat() -> Result<Option<WebchatConfig>> {
    if !Confirm::new("Enable the in-process web chat channel?")
        .with_default(true)
        .prompt()?
    {
        return Ok(None);
    }
    let bind_port = Text::new("Webchat bind port:").with_default("8081").prompt()?;
    Ok(Some(WebchatConfig {
        bind_port: bind_port.parse().unwrap_or(8081),
    }))
}

fn prompt_server() -> Result<ServerConfig> {
    let mut server = ServerConfig::default();
    let port = Text::new("Gateway port:")
        .with_default(&server.port.to_string())
        .prompt()?;
    server.port = port.parse().unwrap_or(server.port);

    server.auth_token = Text::new("Admin API bearer token (blank binds to 127.0.0.1 only):")
        .prompt_skippable()?
        .filter(|s: &String| !s.is_empty());

    server.webhook_secret = Text::new("Webhook HMAC secret (blank falls back to the bearer token):")
        .prompt_skippable()?
        .filter(|s: &String| !s.is_empty());

    if Confirm::new("Enable web_search (Brave Search API)?")
        .with_default(false)
        .prompt()?
    {
        server.brave_api_key = Text::new("Brave Search API key:").prompt_skippable()?;
    }

    Ok(server)
}
