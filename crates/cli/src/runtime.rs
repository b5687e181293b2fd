//! Wiring shared by the long-running commands.

use anyhow::Context;
use forgehand_agent::{AgentLoop, SessionRegistry};
use forgehand_channels::{HttpTelegramApi, TelegramChannel};
use forgehand_config::AppConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn default_config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Load `path` (defaults when missing), then apply environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_from(path)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Provider, checkpoint store and tools assembled into one shared loop.
pub fn build_agent(config: &AppConfig) -> anyhow::Result<Arc<AgentLoop>> {
    let provider = forgehand_providers::build_from_config(&config.provider)
        .context("Failed to set up the model provider")?;
    let checkpoints = forgehand_checkpoint::build_from_config(&config.checkpoint);
    let tools = forgehand_tools::default_registry(&config.workspace, checkpoints.clone());

    info!(
        provider = provider.name(),
        model = %config.provider.model,
        tools = tools.len(),
        checkpoint = checkpoints.backend_name(),
        "Agent ready"
    );
    Ok(Arc::new(AgentLoop::from_config(
        provider,
        Arc::new(tools),
        checkpoints,
        config,
    )))
}

/// The Telegram channel with its own session registry.
pub fn telegram_channel(config: &AppConfig, agent: Arc<AgentLoop>) -> anyhow::Result<TelegramChannel> {
    let token = config
        .telegram
        .bot_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .context("telegram.bot_token is not set (or export TELEGRAM_BOT_TOKEN)")?;
    if config.telegram.allowed_users.is_empty() {
        warn!("telegram.allowed_users is empty; every sender will be refused");
    }

    let api = HttpTelegramApi::new(&config.telegram.api_base, token)?;
    let sessions = Arc::new(SessionRegistry::new(agent, config.telegram.message_limit));
    Ok(TelegramChannel::new(Arc::new(api), config.telegram.clone(), sessions))
}

/// A token cancelled on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });
    token
}
