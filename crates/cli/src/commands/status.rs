//! `forgehand status` — Show the effective configuration.

use forgehand_config::AppConfig;
use std::path::Path;

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

pub async fn run(config: &AppConfig, config_path: &Path) -> anyhow::Result<()> {
    println!("🔨 Forgehand Status");
    println!("==================");
    println!("  Config file:  {}", config_path.display());
    println!("  Model:        {}", config.provider.model);
    println!("  API key set:  {}", yes_no(config.has_api_key()));
    println!("  Knowledge:    {}", config.workspace.knowledge_dir.display());
    println!("  Repository:   {}", config.workspace.repo_dir.display());
    println!("  Commands:     {}", config.workspace.allowed_commands.join(", "));
    println!(
        "  Phase limits: {} turns, {} input tokens",
        config.agent.max_turns_per_phase, config.agent.phase_token_ceiling
    );
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!("  Password set: {}", yes_no(config.gateway.password.is_some()));
    println!("  Telegram:     {}", if config.telegram.enabled { "enabled" } else { "disabled" });

    let store = forgehand_checkpoint::build_from_config(&config.checkpoint);
    match store.load().await {
        Some(record) => println!("  Checkpoint:   {} (next: {})", record.goal, record.next_step),
        None => println!("  Checkpoint:   none"),
    }

    if !config_path.exists() {
        println!("\n  ⚠️  No config file — run `forgehand init` first");
    } else if !config.has_api_key() {
        println!("\n  ⚠️  No API key — set provider.api_key or ANTHROPIC_API_KEY");
    }
    Ok(())
}
