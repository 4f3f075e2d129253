//! `twin models`: List models installed on the backend.

use twin_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let provider = twin_providers::build_from_config(&config)?;

    let models = provider
        .list_models()
        .await
        .map_err(|e| format!("Could not reach {}: {e}", provider.name()))?;

    if models.is_empty() {
        println!("No models installed");
    } else {
        println!("Installed models ({}):", provider.name());
        for model in &models {
            let marker = if *model == config.default_model { "*" } else { " " };
            println!("  {marker} {model}");
        }
    }

    if !config.model_aliases.is_empty() {
        println!("\nAliases:");
        for (alias, model) in &config.model_aliases {
            println!("    {alias} -> {model}");
        }
    }
    Ok(())
}
