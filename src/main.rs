//! Argent 网关服务器
//!
//! 加载配置、构建补全客户端与命令注册表，启动运行队列 worker 与 WebSocket Hub。
//!
//! 运行方式：
//! ```bash
//! cargo run -- --model gpt-4o --bind 127.0.0.1:8080
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use argent::agent::Services;
use argent::commands::builtin_registry;
use argent::config::load_config;
use argent::core::UsageLedger;
use argent::gateway::{Hub, HubConfig, ManagerSettings, RunQueue, SessionManager};
use argent::llm::{LlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};
use argent::observability;

#[derive(Parser)]
#[command(name = "argent", version, about = "Recursive agent orchestration server")]
struct Cli {
    /// Default model for new sessions
    #[arg(short, long)]
    model: Option<String>,

    /// WebSocket listen address
    #[arg(long)]
    bind: Option<String>,

    /// Extra config file layered over config/default.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config).context("Failed to load config")?;
    let model = cli.model.unwrap_or_else(|| cfg.app.model.clone());
    let bind_addr = cli.bind.unwrap_or_else(|| cfg.server.bind_addr.clone());
    let runs_root = match cfg.app.runs_root.clone() {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    let openai = OpenAiClient::from_config(&cfg.llm).context("Failed to create LLM client")?;
    let llm: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(
        Arc::new(openai),
        RetryConfig {
            max_attempts: cfg.llm.max_retries,
            backoff: Duration::from_millis(cfg.llm.retry_backoff_ms),
        },
    ));
    let registry = builtin_registry(&cfg.tools).context("Failed to register commands")?;
    let services = Services {
        llm,
        registry: Arc::new(registry),
        ledger: Arc::new(UsageLedger::new()),
    };

    let (queue, worker) = RunQueue::new();
    let worker = tokio::spawn(worker.run());
    let manager = SessionManager::new(
        ManagerSettings {
            runs_root,
            default_model: model.clone(),
        },
        services,
        queue,
    );

    let hub = Hub::new(HubConfig { bind_addr }, Arc::clone(&manager));
    let shutdown = hub.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down...");
            shutdown.cancel();
        }
    });

    tracing::info!(model = %model, "Starting Argent; press Ctrl+C to stop");
    hub.serve().await.map_err(anyhow::Error::msg)?;

    drop(hub);
    drop(manager);
    worker.abort();
    Ok(())
}
