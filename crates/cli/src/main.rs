use anyhow::Result;
use atrium_agent::config::{AgentConfig, RetryConfig, ToolPermissionConfig};
use atrium_agent::dispatcher::{Dispatcher, PermissionMode};
use atrium_agent::event_bus::EventBus;
use atrium_agent::hooks::HookPipeline;
use atrium_agent::pool::{AgentDeps, AgentPool};
use atrium_agent::store::file::FileStore;
use atrium_agent::store::Store;
use atrium_agent::tools::ToolRegistry;
use clap::{CommandFactory, Parser};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod chat;
mod cli_args;
mod commands;
mod echo_provider;
mod tracing;

use cli_args::{CliArgs, Commands, PermissionModeArg};
use echo_provider::EchoProvider;

fn permission_mode(arg: Option<PermissionModeArg>) -> PermissionMode {
    match arg {
        None | Some(PermissionModeArg::Auto) => PermissionMode::Auto,
        Some(PermissionModeArg::Approval) => PermissionMode::Approval,
        Some(PermissionModeArg::Readonly) => PermissionMode::Readonly,
    }
}

fn build_config(args: &CliArgs) -> Result<AgentConfig> {
    if let Some(path) = &args.config {
        return Ok(AgentConfig::load_from_path(path)?);
    }

    let system_prompt = if args.system.is_empty() { None } else { Some(args.system.join("\n")) };

    Ok(AgentConfig {
        model: args.model.clone(),
        system_prompt,
        max_iterations: args.max_iterations.unwrap_or(atrium_agent::config::DEFAULT_MAX_ITERATIONS),
        concurrency: atrium_agent::config::DEFAULT_CONCURRENCY,
        event_buffer: atrium_agent::config::DEFAULT_EVENT_BUFFER,
        idle_ttl_secs: atrium_agent::config::DEFAULT_IDLE_TTL_SECS,
        permissions: ToolPermissionConfig {
            mode: permission_mode(args.permission_mode),
            ..Default::default()
        },
        retry: RetryConfig::default(),
        store_root: args.store_root.clone().unwrap_or_else(AgentConfig::default_store_root),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if let Some(Commands::Completion { shell }) = args.command {
        let mut cmd = CliArgs::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    tracing::setup_logging();

    let config = build_config(&args)?;
    let store: Arc<dyn Store> = Arc::new(FileStore::new(config.store_root.clone()));
    let event_bus = Arc::new(EventBus::new(Arc::clone(&store)));
    let registry = Arc::new(ToolRegistry::new());
    let hooks = HookPipeline::new();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        HookPipeline::new(),
        config.permissions.to_tool_policy(config.concurrency),
    ));
    let sandbox = Arc::new(atrium_sandbox::Boundary::new(std::env::current_dir()?));
    let provider = Arc::new(EchoProvider::new(config.model.clone()));

    let deps = AgentDeps {
        store: Arc::clone(&store),
        event_bus: Arc::clone(&event_bus),
        provider,
        registry,
        dispatcher,
        hooks,
        sandbox,
    };

    let idle_ttl = Duration::from_secs(config.idle_ttl_secs);
    let pool = AgentPool::new(deps, config.clone(), idle_ttl);

    let agent_id = args.agent_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    ::tracing::info!(agent_id, model = %config.model, "leasing agent");
    let lease = pool.lease(&agent_id, CancellationToken::new()).await?;
    println!("agent: {agent_id}");

    match args.prompt {
        Some(prompt) => chat::run_one_shot(lease, prompt).await,
        None => chat::run_interactive(lease, event_bus).await,
    }
}
