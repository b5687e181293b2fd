//! `forgehand checkpoint show|clear` — Inspect the saved task record.

use forgehand_config::AppConfig;

fn location(config: &AppConfig) -> String {
    match config.checkpoint.backend.as_str() {
        "memory" => "in-memory backend, nothing persists between runs".into(),
        _ => config.checkpoint.path.display().to_string(),
    }
}

pub async fn show(config: &AppConfig) -> anyhow::Result<()> {
    let store = forgehand_checkpoint::build_from_config(&config.checkpoint);
    match store.load().await {
        Some(record) => {
            println!("{}", record.render().trim_end());
            println!("\nSaved at: {}", record.saved_at.to_rfc3339());
            println!("Stored in: {}", location(config));
        }
        None => println!("No checkpoint saved ({}).", location(config)),
    }
    Ok(())
}

pub async fn clear(config: &AppConfig) -> anyhow::Result<()> {
    let store = forgehand_checkpoint::build_from_config(&config.checkpoint);
    store.clear().await?;
    println!("✅ Checkpoint cleared.");
    Ok(())
}
