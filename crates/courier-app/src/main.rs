use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use courier_agent::{AgentManager, SubprocessClientFactory};
use courier_app::{router, spawn_session_gc, Orchestrator};
use courier_chat::{BotApiTransport, ChatApi};
use courier_config::CourierConfig;
use courier_history::SessionResolver;
use courier_options::OptionsBuilder;
use courier_store::SessionStore;

const GC_SWEEP_EVERY: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = CourierConfig::from_env()?;

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SessionStore::open(&config.db_path)?);

    let chat: Arc<dyn ChatApi> = Arc::new(BotApiTransport::new(config.bot_token.clone())?);
    let manager = AgentManager::new(
        Arc::new(SubprocessClientFactory),
        OptionsBuilder::new(config.agent_config_dir.clone(), config.agent_binary.clone()),
        SessionResolver::new(&config.agent_config_dir),
        Arc::clone(&store),
        config.idle_timeout,
    );

    let webhook_addr = config.webhook_addr;
    let gc_hours = config.session_gc_hours;
    let orchestrator = Orchestrator::new(config, chat, manager);
    orchestrator.spawn_group_worker();
    spawn_session_gc(store, gc_hours, GC_SWEEP_EVERY);

    let listener = tokio::net::TcpListener::bind(webhook_addr).await?;
    tracing::info!(addr = %webhook_addr, "courier webhook listening");
    axum::serve(listener, router(orchestrator)).await?;

    Ok(())
}
