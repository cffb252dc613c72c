pub mod onboard;
pub mod verify;

use mozi_agent::{AgentRunner, ContextBuilder, SessionManager};
use mozi_core::bus::{Event, MessageBus};
use mozi_core::channel::{is_native_channel_supported, ChannelAdapter};
use mozi_core::config::AppConfig;
use mozi_core::metrics::MetricsStore;
use mozi_cron::{AgentExecutor, Executor, FileJobStore, SchedulerConfig, SchedulerService, SystemClock};
use mozi_delivery::{Channel, ChannelRegistry, DeliveryService};
use mozi_dingtalk::DingtalkChannel;
use mozi_feishu::FeishuChannel;
use mozi_providers::factory::create_provider;
use mozi_qq::QqChannel;
use mozi_server::{Gateway, GatewayRuntimeConfig};
use mozi_tools::cron_tools::{CronAddTool, CronListTool, CronRemoveTool, CronRunTool, CronUpdateTool};
use mozi_tools::exec_tool::ExecTool;
use mozi_tools::platform_tools::{ChannelHealthTool, DatetimeNowTool, MetricsSnapshotTool};
use mozi_tools::registry::ToolRegistry;
use mozi_tools::sandbox::SandboxConfig;
use mozi_tools::sessions_tools::{SessionsHistoryTool, SessionsListTool, SessionsSendTool};
use mozi_tools::web_fetch::WebFetchTool;
use mozi_tools::web_search::WebSearchTool;
use mozi_tools::Tool;
use mozi_wecom::WecomChannel;
use mozi_webchat::WebchatChannel;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

pub fn get_config_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".mozi")
}

pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.json")
}

/// Everything a running `mozi` process needs, assembled once and shared by
/// the `gateway` and `cron` subcommands.
pub struct Runtime {
    pub config: AppConfig,
    pub bus: Arc<MessageBus>,
    pub metrics: Arc<MetricsStore>,
    pub sessions_store: mozi_persistence::SqliteSessionStore,
    pub scheduler: Arc<SchedulerService>,
    pub webchat: Arc<WebchatChannel>,
    pub adapters: Vec<Arc<dyn ChannelAdapter>>,
    pub agent_executor: Option<Arc<dyn AgentExecutor>>,
    pub reload_tx: mpsc::Sender<()>,
}

fn build_channel_registry(config: &AppConfig, webchat: Arc<WebchatChannel>) -> (ChannelRegistry, Vec<Arc<dyn ChannelAdapter>>) {
    let mut registry = ChannelRegistry::new().with_default_channel(config.cron.default_channel.clone());
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();

    if let Some(cfg) = &config.dingtalk {
        let dingtalk = Arc::new(DingtalkChannel::new(cfg.webhook_url.clone(), cfg.secret.clone()));
        registry.register(dingtalk.clone() as Arc<dyn Channel>);
        adapters.push(dingtalk as Arc<dyn ChannelAdapter>);
    }
    if let Some(cfg) = &config.feishu {
        let feishu = Arc::new(FeishuChannel::new(cfg.webhook_url.clone(), cfg.secret.clone()));
        registry.register(feishu as Arc<dyn Channel>);
    }
    if let Some(cfg) = &config.qq {
        let qq = Arc::new(QqChannel::new(cfg.app_id.clone(), cfg.app_secret.clone()));
        registry.register(qq as Arc<dyn Channel>);
    }
    if let Some(cfg) = &config.wecom {
        let wecom = Arc::new(WecomChannel::new(cfg.webhook_url.clone()));
        registry.register(wecom as Arc<dyn Channel>);
    }
    if config.webchat.is_some() {
        registry.register(webchat as Arc<dyn Channel>);
    }

    (registry, adapters)
}

async fn build_tool_registry(config: &AppConfig, scheduler: Arc<SchedulerService>, sessions_store: mozi_persistence::SqliteSessionStore, bus: Arc<MessageBus>) -> ToolRegistry {
    let tools = ToolRegistry::new();
    let sandbox = SandboxConfig {
        workspace_path: config.workspace.clone(),
        exec_timeout_secs: 30,
        max_output_bytes: 64 * 1024,
        exec_enabled: true,
        network_allowlist: Vec::new(),
        ..Default::default()
    };

    let cron_tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(CronListTool::new(scheduler.clone())),
        Arc::new(CronAddTool::new(scheduler.clone())),
        Arc::new(CronRemoveTool::new(scheduler.clone())),
        Arc::new(CronUpdateTool::new(scheduler.clone())),
        Arc::new(CronRunTool::new(scheduler)),
    ];

    let base_url = format!("http://127.0.0.1:{}", config.server.port);
    let mut other_tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ExecTool::new(sandbox.clone())),
        Arc::new(WebFetchTool::new(sandbox.clone())),
        Arc::new(ChannelHealthTool::new(base_url.clone(), config.server.auth_token.clone())),
        Arc::new(MetricsSnapshotTool::new(base_url, config.server.auth_token.clone())),
        Arc::new(DatetimeNowTool::new()),
        Arc::new(SessionsListTool::new(sessions_store.clone())),
        Arc::new(SessionsHistoryTool::new(sessions_store)),
        Arc::new(SessionsSendTool::new(bus)),
    ];

    if let Some(brave_key) = &config.server.brave_api_key {
        other_tools.push(Arc::new(WebSearchTool::new(brave_key.clone(), sandbox)));
    }

    for tool in cron_tools.into_iter().chain(other_tools) {
        tools.register(tool).await;
    }

    tools
}

/// Builds the full set of collaborators (bus, provider, scheduler, channel
/// registry) a running gateway or a one-off `cron` invocation needs.
pub async fn build_runtime(config: AppConfig) -> anyhow::Result<Runtime> {
    tokio::fs::create_dir_all(&config.workspace).await?;

    let metrics = MetricsStore::new();
    let bus = Arc::new(MessageBus::new(256).with_metrics(metrics.clone()));
    let (reload_tx, _reload_rx) = mpsc::channel(1);

    let db_path = config.workspace.join("mozi.db");
    let store_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let sessions_store = mozi_persistence::SqliteSessionStore::new(&store_url).await?;

    let webchat = Arc::new(WebchatChannel::new());
    let (registry, adapters) = build_channel_registry(&config, webchat.clone());
    let delivery = Arc::new(DeliveryService::new(Arc::new(registry)));

    let agent_executor: Option<Arc<dyn AgentExecutor>> = match create_provider(&config) {
        Ok(provider) => {
            let context_builder = ContextBuilder::new(config.agents.default.system_prompt.clone());
            let sessions = SessionManager::new(Arc::new(sessions_store.clone()));
            let runner = AgentRunner::new(config.clone(), provider, context_builder, sessions);
            Some(Arc::new(runner) as Arc<dyn AgentExecutor>)
        }
        Err(e) => {
            error!("No LLM provider configured, agentTurn jobs will be skipped: {}", e);
            None
        }
    };

    let executor = Arc::new(Executor::new(agent_executor, delivery));
    let store = Arc::new(FileJobStore::new(config.cron.store_path.clone()));
    let scheduler = Arc::new(SchedulerService::new(
        store,
        Arc::new(SystemClock),
        executor,
        None,
        SchedulerConfig {
            tick_interval_ms: config.cron.tick_interval_secs * 1_000,
            shutdown_grace_ms: config.cron.shutdown_grace_secs * 1_000,
        },
    ));

    Ok(Runtime {
        config,
        bus,
        metrics,
        sessions_store,
        scheduler,
        webchat,
        adapters,
        reload_tx,
    })
}

fn log_channel_readiness(config: &AppConfig) {
    for channel in config.configured_channels() {
        if is_native_channel_supported(channel) {
            info!("Channel '{}' is configured and has a native adapter", channel);
        } else {
            info!("Channel '{}' is configured but has no native adapter", channel);
        }
    }
}

/// Starts the scheduler tick loop, the channel adapters with a persistent
/// inbound connection (currently only DingTalk), and the admin/webchat
/// gateway. Blocks until the process receives a shutdown signal.
pub async fn run_gateway(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).map_err(|e| {
        anyhow::anyhow!("failed to load config: {}. Run 'mozi onboard' first.", e)
    })?;

    let runtime = build_runtime(config).await?;
    let config = runtime.config.clone();

    runtime.scheduler.start().await?;
    info!("Scheduler started, tick interval {}s", config.cron.tick_interval_secs);

    for adapter in runtime.adapters.iter().cloned() {
        let name = adapter.channel_name().to_string();
        tokio::spawn(async move {
            if let Err(e) = adapter.start().await {
                error!("{} adapter error: {}", name, e);
            }
        });
    }
    log_channel_readiness(&config);

    let tools = build_tool_registry(
        &config,
        runtime.scheduler.clone(),
        runtime.sessions_store.clone(),
        runtime.bus.clone(),
    )
    .await;
    info!("Tool facade ready with {} tools", tools.list_definitions().await.len());

    let mut bus_rx = runtime.bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            if let Event::OutboundMessage(msg) = event {
                info!(channel = %msg.channel, "outbound message delivered");
            }
        }
    });

    let gateway = Gateway::with_auth(
        runtime.bus.clone(),
        config.server.port,
        config.server.auth_token.clone(),
        runtime.metrics.clone(),
        runtime.reload_tx.clone(),
        runtime.sessions_store.clone(),
        runtime.scheduler.clone(),
        runtime.webchat.clone(),
        config.server.webhook_secret.clone().or_else(|| config.server.auth_token.clone()),
        config
            .configured_channels()
            .into_iter()
            .map(str::to_string)
            .collect(),
        GatewayRuntimeConfig::default(),
    );

    info!("Gateway listening on port {}", config.server.port);
    gateway.start().await?;

    runtime.scheduler.stop().await;
    Ok(())
}

pub fn print_status(config_path: Option<PathBuf>) {
    let path = config_path.clone().unwrap_or_else(get_config_path);
    println!("mozi status\n");

    if !path.exists() {
        println!("Config: {} \u{2717} (run 'mozi onboard')", path.display());
        return;
    }
    println!("Config: {} \u{2713}", path.display());

    match AppConfig::load(config_path) {
        Ok(config) => {
            println!("Workspace: {}", config.workspace.display());
            println!("Model: {}", config.agents.default.model);
            let check = |name: &str, has: bool| {
                println!("{}: {}", name, if has { "\u{2713}" } else { "not set" });
            };
            check("OpenAI API", config.providers.openai.is_some());
            check("Anthropic API", config.providers.anthropic.is_some());
            check("DingTalk", config.dingtalk.is_some());
            check("Feishu", config.feishu.is_some());
            check("QQ", config.qq.is_some());
            check("WeCom", config.wecom.is_some());
            check("WebChat", config.webchat.is_some());
            println!("Cron store: {}", config.cron.store_path.display());
        }
        Err(e) => println!("Error loading config: {}", e),
    }
}
