//! `forgehand gateway` — Start the HTTP/WebSocket gateway.

use crate::runtime;
use anyhow::Context;
use forgehand_agent::SessionRegistry;
use forgehand_config::AppConfig;
use std::sync::Arc;

pub async fn run(mut config: AppConfig, port_override: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let agent = runtime::build_agent(&config)?;
    let sessions = Arc::new(SessionRegistry::new(agent, config.gateway.message_limit));

    println!("🔨 Forgehand Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Password:  {}",
        if config.gateway.password.is_some() { "required" } else { "none" }
    );

    forgehand_gateway::serve(&config.gateway, sessions, runtime::shutdown_on_ctrl_c())
        .await
        .context("Gateway stopped")?;
    Ok(())
}
