//! `twin init`: First-time setup.

use std::path::Path;
use twin_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("twin: First-Time Setup");
    println!("=======================\n");

    let config = if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run init.\n");
        AppConfig::load_from(&config_path).map_err(|e| format!("Failed to load config: {e}"))?
    } else {
        std::fs::create_dir_all(&config_dir)?;
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
        AppConfig::default()
    };

    for dir in directories(&config) {
        if dir.exists() {
            println!("  Directory exists: {}", dir.display());
        } else {
            std::fs::create_dir_all(dir)?;
            println!("  Created directory: {}", dir.display());
        }
    }

    println!("\nNext steps:");
    println!("   1. Make sure Ollama is running and `{}` is pulled", config.default_model);
    println!("   2. Add agents under {}/<name>/MASTER_AGENT.md", config.paths.agents_dir.display());
    println!("   3. Run: twin\n");

    Ok(())
}

fn directories(config: &AppConfig) -> [&Path; 3] {
    [
        config.paths.context_dir.as_path(),
        config.paths.sessions_dir.as_path(),
        config.paths.agents_dir.as_path(),
    ]
}
