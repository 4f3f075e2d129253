//! Provider trait: the abstraction over language-model backends.
//!
//! A Provider knows how to send a conversation to a model and get a single
//! assistant reply back. Calls can be supervised with a cancellation token so
//! the operator can abort a long generation without losing the session.
//!
//! Implementations: Ollama over HTTP, Ollama as a subprocess.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::error::ProviderError;
use crate::message::Message;

/// Sampling and runtime options passed with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Context window size in tokens
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,

    /// How long the backend keeps the model loaded (e.g. "5m")
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_num_ctx() -> u32 {
    8192
}

fn default_keep_alive() -> String {
    "5m".into()
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            num_ctx: default_num_ctx(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// A single chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "qwen2.5-coder:7b")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Generation options
    #[serde(default)]
    pub options: GenerationOptions,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (role Assistant)
    pub message: Message,

    /// Token usage statistics, when the backend reports them
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The orchestrator calls `complete_cancellable()` without knowing which
/// backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request that is abandoned as soon as `cancel` fires.
    ///
    /// The default drops the in-flight future. Providers that own a child
    /// process override this to terminate it politely before killing it.
    async fn complete_cancellable(
        &self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        tokio::select! {
            result = self.complete(request) => result,
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        }
    }

    /// List models installed on the backend.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
