//! Provider selection: builds the configured backend.

use std::sync::Arc;
use std::time::Duration;
use twin_config::{AppConfig, BackendKind};
use twin_core::error::ProviderError;
use twin_core::provider::Provider;
use crate::ollama::OllamaProvider;
use crate::ollama_cli::OllamaCliProvider;

/// Build the backend named by `config.backend.kind`.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let backend = &config.backend;
    let provider: Arc<dyn Provider> = match backend.kind {
        BackendKind::Http => Arc::new(OllamaProvider::new(
            &backend.url,
            backend.request_timeout_secs.map(Duration::from_secs),
        )?),
        BackendKind::Cli => Arc::new(OllamaCliProvider::new(
            &backend.binary,
            Duration::from_millis(backend.poll_interval_ms),
            Duration::from_millis(backend.cancel_grace_ms),
        )),
    };

    tracing::debug!(provider = provider.name(), "Backend configured");
    Ok(provider)
}
