//! `forgehand init` — Write a default config file.

use anyhow::{Context, bail};
use forgehand_config::AppConfig;
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(config_path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("✅ Created config at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set provider.api_key (or export ANTHROPIC_API_KEY)");
    println!("   2. Point workspace.knowledge_dir and workspace.repo_dir at your project");
    println!("   3. Set gateway.password and, for Telegram, the bot token and allowed_users");
    println!("   4. Run: forgehand serve");
    Ok(())
}
