//! `forgehand serve` — Gateway plus Telegram, sharing one agent.

use crate::runtime;
use anyhow::Context;
use forgehand_agent::SessionRegistry;
use forgehand_config::AppConfig;
use std::sync::Arc;
use tracing::info;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let agent = runtime::build_agent(&config)?;
    let shutdown = runtime::shutdown_on_ctrl_c();

    println!("🔨 Forgehand");
    println!("   Gateway:  {}:{}", config.gateway.host, config.gateway.port);

    let telegram = if config.telegram.enabled {
        let channel = runtime::telegram_channel(&config, agent.clone())?;
        let stop = shutdown.clone();
        println!("   Telegram: enabled");
        Some(tokio::spawn(async move { channel.run(stop).await }))
    } else {
        println!("   Telegram: disabled");
        None
    };

    let sessions = Arc::new(SessionRegistry::new(agent, config.gateway.message_limit));
    let served = forgehand_gateway::serve(&config.gateway, sessions, shutdown.clone()).await;

    // A gateway failure takes the bot down with it.
    shutdown.cancel();
    if let Some(task) = telegram {
        let _ = task.await;
        info!("Telegram channel stopped");
    }
    served.context("Gateway stopped")?;
    Ok(())
}
