//! `forgehand telegram` — Run the Telegram bot alone.

use crate::runtime;
use forgehand_config::AppConfig;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let agent = runtime::build_agent(&config)?;
    let channel = runtime::telegram_channel(&config, agent)?;

    println!("🔨 Forgehand Telegram bot");
    println!("   Allowed users: {}", config.telegram.allowed_users.join(", "));

    channel.run(runtime::shutdown_on_ctrl_c()).await;
    Ok(())
}
