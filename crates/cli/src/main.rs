use clap::{Parser, Subcommand};
use mozi_cli::{get_config_dir, get_config_path, print_status, run_gateway};
use mozi_core::config::AppConfig;
use mozi_cron::{AgentExecutor, AgentTurnRequest, CreateJob, JobPatch, Payload, Schedule};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "mozi")]
#[command(version = VERSION)]
#[command(about = "Durable cron scheduler and multi-channel chatbot gateway")]
struct Cli {
    /// Path to config.json, defaults to ~/.mozi/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive first-run configuration wizard
    Onboard,
    /// Print whether config is present and which providers/channels are set
    Status,
    /// Start the scheduler, channel adapters, and admin/webchat gateway
    Gateway,
    /// Run a single agent turn against the configured provider
    Agent {
        /// Message to send
        #[arg(short, long)]
        message: String,
        /// Session key to append to (defaults to a fresh uuid)
        #[arg(short, long)]
        session_key: Option<String>,
    },
    /// Manage durable cron jobs
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand)]
enum CronAction {
    /// List all jobs
    List {
        /// Include disabled jobs
        #[arg(long)]
        all: bool,
    },
    /// Add a job that sends a fixed message on an interval
    Add {
        name: String,
        /// Milliseconds between runs
        #[arg(long)]
        every_ms: i64,
        /// systemEvent message, or agentTurn prompt when --agent is set
        message: String,
        /// Run the message through the agent instead of a bare system event
        #[arg(long)]
        agent: bool,
        /// Deliver the agent's reply ("channel:to", or a bare chat id with --channel)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Remove a job
    Remove { id: String },
    /// Enable a job
    Enable { id: String },
    /// Disable a job
    Disable { id: String },
    /// Run a job immediately, outside its schedule
    Run { id: String },
}

fn init_logging() {
    let (non_blocking, _guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        get_config_dir().join("logs"),
        "mozi.jsonl",
    ));

    let audit_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_level(false)
        .with_file(false)
        .with_line_number(false)
        .without_time()
        .with_filter(tracing_subscriber::filter::Targets::new().with_target("audit", Level::INFO));

    let stdout_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() != "audit"
        }));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(audit_layer)
        .init();
    // Box leaks the guard for the process lifetime; a CLI invocation never
    // needs to flush logs mid-run.
    std::mem::forget(_guard);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Status) => {
            print_status(cli.config);
            Ok(())
        }
        Some(Commands::Onboard) => {
            if let Err(e) = mozi_cli::onboard::run_onboard(cli.config).await {
                error!("Onboarding failed: {}", e);
                return Err(e);
            }
            Ok(())
        }
        Some(Commands::Gateway) => {
            let runtime_result = run_gateway(cli.config);
            tokio::select! {
                res = runtime_result => res,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    Ok(())
                }
            }
        }
        Some(Commands::Agent { message, session_key }) => run_agent(cli.config, message, session_key).await,
        Some(Commands::Cron { action }) => run_cron(cli.config, action).await,
    }
}

async fn run_agent(config_path: Option<PathBuf>, message: String, session_key: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).map_err(|e| {
        anyhow::anyhow!("Failed to load config: {}. Run 'mozi onboard' first.", e)
    })?;

    let runtime = mozi_cli::build_runtime(config).await?;
    let session_key = session_key.unwrap_or_else(|| format!("cli:{}", uuid::Uuid::new_v4()));

    let Some(agent) = &runtime.scheduler_agent_executor() else {
        anyhow::bail!("No LLM provider configured. Set providers.openai or providers.anthropic.");
    };

    let response = agent
        .execute(AgentTurnRequest {
            message,
            session_key,
            model: None,
            timeout_seconds: None,
        })
        .await?;

    if response.success {
        println!("{}", response.output);
        Ok(())
    } else {
        anyhow::bail!(response.error.unwrap_or_else(|| "agent turn failed".to_string()));
    }
}

async fn run_cron(config_path: Option<PathBuf>, action: CronAction) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path).map_err(|e| {
        anyhow::anyhow!("Failed to load config: {}. Run 'mozi onboard' first.", e)
    })?;

    let runtime = mozi_cli::build_runtime(config).await?;
    let scheduler = runtime.scheduler.clone();
    // `jobs` is only populated once `start()` loads the store; a short-lived
    // CLI invocation pays the tick-loop startup cost for that side effect
    // and tears it down again once the CRUD operation is done.
    scheduler.start().await?;

    let result = match action {
        CronAction::List { all } => {
            let jobs = scheduler.list(all).await;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
            Ok(())
        }
        CronAction::Add {
            name,
            every_ms,
            message,
            agent,
            to,
            channel,
        } => {
            let payload = if agent {
                Payload::AgentTurn {
                    message,
                    model: None,
                    timeout_seconds: None,
                    deliver: Some(to.is_some() || channel.is_some()),
                    channel,
                    to,
                }
            } else {
                Payload::SystemEvent { message }
            };
            let job = scheduler
                .add(CreateJob {
                    name,
                    enabled: Some(true),
                    schedule: Schedule::Every { every_ms },
                    payload,
                })
                .await?;
            println!("Added job {}", job.id);
            Ok(())
        }
        CronAction::Remove { id } => {
            let removed = scheduler.remove(&id).await?;
            println!("{}", if removed { "removed" } else { "not found" });
            Ok(())
        }
        CronAction::Enable { id } => {
            scheduler
                .update(
                    &id,
                    JobPatch {
                        enabled: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            println!("enabled");
            Ok(())
        }
        CronAction::Disable { id } => {
            scheduler
                .update(
                    &id,
                    JobPatch {
                        enabled: Some(false),
                        ..Default::default()
                    },
                )
                .await?;
            println!("disabled");
            Ok(())
        }
        CronAction::Run { id } => {
            let result = scheduler.run(&id).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    };

    scheduler.stop().await;
    result
}
