//! Ollama HTTP provider.
//!
//! Talks to a local (or remote) Ollama server:
//! - `POST /api/chat` with `stream: false` for completions
//! - `GET /api/tags` for the installed-model list
//!
//! Image attachments are read from disk and sent base64-encoded.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use twin_core::error::ProviderError;
use twin_core::message::{Message, Role};
use twin_core::provider::*;

/// A provider backed by the Ollama HTTP API.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the server at `base_url`.
    ///
    /// `timeout` bounds a whole request; `None` waits indefinitely and relies
    /// on cancellation instead.
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, ProviderError> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(5));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Convert our Message types to Ollama's wire format.
    async fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            let mut images = Vec::new();
            for path in &m.images {
                match tokio::fs::read(path).await {
                    Ok(bytes) => images.push(STANDARD.encode(bytes)),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable image"),
                }
            }
            out.push(ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                images,
            });
        }
        out
    }

    fn map_send_error(err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() {
            ProviderError::Unavailable(format!("Cannot reach Ollama: {err}"))
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl twin_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = ApiChatRequest {
            model: request.model.clone(),
            messages: Self::to_api_messages(&request.messages).await,
            stream: false,
            options: ApiOptions {
                temperature: request.options.temperature,
                top_p: request.options.top_p,
                num_ctx: request.options.num_ctx,
            },
            keep_alive: request.options.keep_alive.clone(),
        };

        debug!(model = %request.model, messages = body.messages.len(), "Sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status().as_u16();

        if status == 404 {
            let error_body = response.text().await.unwrap_or_default();
            debug!(body = %error_body, "Model lookup failed");
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Ollama returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        if api_response.message.role != Role::Assistant.as_str() {
            return Err(ProviderError::Decode(format!(
                "expected assistant reply, got role '{}'",
                api_response.message.role
            )));
        }

        let usage = match (api_response.prompt_eval_count, api_response.eval_count) {
            (Some(prompt), Some(completion)) => Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            _ => None,
        };

        Ok(ProviderResponse {
            message: Message::assistant(api_response.message.content),
            usage,
            model: api_response.model,
        })
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: response.status().as_u16(),
                message: "Failed to list models".into(),
            });
        }

        let tags: ApiTags = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Ok(response.status().is_success())
    }
}

// --- Ollama API types (internal) ---

#[derive(Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    options: ApiOptions,
    keep_alive: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct ApiOptions {
    temperature: f32,
    top_p: f32,
    num_ctx: u32,
}

#[derive(Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    model: String,
    message: ApiMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiTags {
    #[serde(default)]
    models: Vec<ApiModel>,
}

#[derive(Deserialize)]
struct ApiModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_core::Provider;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest {
            model: model.into(),
            messages: vec![Message::system("You are helpful"), Message::user("Hello")],
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn complete_sends_options_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "qwen",
                "stream": false,
                "keep_alive": "5m",
                "options": { "num_ctx": 8192 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "qwen",
                "message": { "role": "assistant", "content": "Hi there" },
                "done": true,
                "prompt_eval_count": 12,
                "eval_count": 3
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), None).unwrap();
        let response = provider.complete(request("qwen")).await.unwrap();
        assert_eq!(response.message.content, "Hi there");
        assert_eq!(response.message.role, Role::Assistant);
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn missing_model_maps_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": "model 'nope' not found"})),
            )
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), None).unwrap();
        let err = provider.complete(request("nope")).await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(m) if m == "nope"));
    }

    #[tokio::test]
    async fn garbage_body_maps_to_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), None).unwrap();
        let err = provider.complete(request("qwen")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), Some(Duration::from_millis(200))).unwrap();
        let err = provider.complete(request("qwen")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let provider = OllamaProvider::new("http://127.0.0.1:9", None).unwrap();
        let err = provider.complete(request("qwen")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{ "name": "qwen2.5-coder:7b" }, { "name": "llava:7b" }]
            })))
            .mount(&server)
            .await;

        let provider = OllamaProvider::new(server.uri(), None).unwrap();
        let models = provider.list_models().await.unwrap();
        assert_eq!(models, vec!["qwen2.5-coder:7b", "llava:7b"]);
        assert!(provider.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn images_are_base64_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("dot.png");
        std::fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();

        let messages = vec![Message::user("what is this").with_images(vec![
            image,
            dir.path().join("missing.png"),
        ])];
        let api = OllamaProvider::to_api_messages(&messages).await;
        assert_eq!(api[0].images, vec![STANDARD.encode([0x89, b'P', b'N', b'G'])]);
    }

    #[test]
    fn base_url_is_normalized() {
        let provider = OllamaProvider::new("http://localhost:11434/", None).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
    }
}
