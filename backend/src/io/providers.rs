//! OpenAI-compatible `/chat/completions` client.
//!
//! One client type serves every configured provider; they differ only in base
//! URL and credentials, which come from the environment.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::types::CompletionRequest;
use crate::error::ModelError;
use crate::io::completion::{CompletionProvider, CompletionService, CompletionStream};
use crate::io::config::{ModelConfig, PROVIDERS};

/// Resolved connection settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub id: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub streaming: bool,
}

/// Resolve base URL and credentials for `provider`.
///
/// `env` is `std::env::var(..).ok()` in production. A provider that needs a
/// key and has none is [`ModelError::Unavailable`].
pub fn resolve_provider(
    provider: &str,
    model: &ModelConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ProviderSettings, ModelError> {
    let non_empty = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    let (base_url, api_key) = match provider {
        "openai" => (
            non_empty("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            Some(required_key(provider, "OPENAI_API_KEY", non_empty("OPENAI_API_KEY"))?),
        ),
        "openrouter" => (
            non_empty("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            Some(required_key(provider, "OPENROUTER_API_KEY", non_empty("OPENROUTER_API_KEY"))?),
        ),
        "ollama" => (
            non_empty("OLLAMA_BASE_URL").unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
            Some(non_empty("OLLAMA_API_KEY").unwrap_or_else(|| "ollama".to_string())),
        ),
        "perplexity" => (
            non_empty("PERPLEXITY_BASE_URL")
                .unwrap_or_else(|| "https://api.perplexity.ai".to_string()),
            Some(required_key(provider, "PERPLEXITY_API_KEY", non_empty("PERPLEXITY_API_KEY"))?),
        ),
        other => {
            return Err(ModelError::Unavailable(format!(
                "unknown provider {other:?} (expected one of {})",
                PROVIDERS.join(", ")
            )));
        }
    };

    Ok(ProviderSettings {
        id: provider.to_string(),
        base_url: base_url.trim_end_matches('/').to_string(),
        api_key,
        model: model.model.clone(),
        temperature: model.temperature,
        max_tokens: model.max_tokens,
        streaming: model.streaming,
    })
}

fn required_key(provider: &str, var: &str, value: Option<String>) -> Result<String, ModelError> {
    value.ok_or_else(|| ModelError::Unavailable(format!("{var} not set for provider {provider}")))
}

/// Build the completion service for `provider`.
pub fn build_client(
    provider: &str,
    model: &ModelConfig,
    system_prompt: String,
) -> Result<Arc<dyn CompletionService>, ModelError> {
    let settings = resolve_provider(provider, model, |key| std::env::var(key).ok())?;
    let client = Client::builder()
        .build()
        .map_err(|err| ModelError::Unavailable(format!("http client: {err}")))?;
    debug!(provider = %settings.id, model = %settings.model, "completion client ready");
    Ok(Arc::new(OpenAiCompatibleClient {
        settings,
        system_prompt,
        client,
    }))
}

/// Builds HTTP clients for whichever provider a session asks for.
pub struct HttpProviders {
    model: ModelConfig,
    system_prompt: String,
}

impl HttpProviders {
    pub fn new(model: ModelConfig, system_prompt: String) -> Self {
        Self {
            model,
            system_prompt,
        }
    }
}

impl CompletionProvider for HttpProviders {
    fn connect(&self, provider: &str) -> Result<Arc<dyn CompletionService>, ModelError> {
        build_client(provider, &self.model, self.system_prompt.clone())
    }
}

pub struct OpenAiCompatibleClient {
    settings: ProviderSettings,
    system_prompt: String,
    client: Client,
}

impl OpenAiCompatibleClient {
    async fn send(&self, body: &Value) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/chat/completions", self.settings.base_url);
        let mut req = self.client.post(url).json(body);
        if let Some(api_key) = &self.settings.api_key {
            req = req.bearer_auth(api_key);
        }
        req.send()
            .await
            .map_err(|err| ModelError::Request(err.to_string()))
    }

    async fn complete_once(&self, messages: Vec<Value>) -> Result<CompletionStream, ModelError> {
        let body = request_body(&self.settings, messages, false);
        let resp = self.send(&body).await?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|err| ModelError::Request(err.to_string()))?;
        if let Some(detail) = extract_error(&value) {
            return Err(ModelError::Request(detail));
        }
        if !status.is_success() {
            return Err(ModelError::Request(format!("provider returned status {status}")));
        }
        let text = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatibleClient {
    #[instrument(skip_all, fields(provider = %self.settings.id, model = %self.settings.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionStream, ModelError> {
        let messages = build_messages(&self.system_prompt, request);
        if !self.settings.streaming {
            return self.complete_once(messages).await;
        }

        let body = request_body(&self.settings, messages.clone(), true);
        let resp = self.send(&body).await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if self.settings.id != "ollama" && streaming_not_permitted(&text) {
                warn!(%status, "streaming rejected by provider, falling back to a single response");
                return self.complete_once(messages).await;
            }
            return Err(ModelError::Request(format!(
                "provider stream request failed with status {status}: {}",
                truncate_for_error(&text, 500)
            )));
        }

        let mut bytes = resp.bytes_stream();
        let stream = try_stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|err| ModelError::Stream(err.to_string()))?;
                for delta in decoder.feed(&chunk)? {
                    yield delta;
                }
                if decoder.is_done() {
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// System prompt, optional context message, then the user prompt.
pub fn build_messages(system_prompt: &str, request: &CompletionRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(3);
    if !system_prompt.trim().is_empty() {
        messages.push(json!({"role": "system", "content": system_prompt}));
    }
    if let Some(context) = &request.context {
        messages.push(json!({
            "role": "system",
            "content": format!("Current context:\n{}", context.render()),
        }));
    }
    messages.push(json!({"role": "user", "content": request.prompt}));
    messages
}

/// Chat request body; reasoning-model families take `max_completion_tokens`
/// and no temperature.
pub fn request_body(settings: &ProviderSettings, messages: Vec<Value>, stream: bool) -> Value {
    let mut body = json!({
        "model": settings.model,
        "messages": messages,
        "stream": stream,
    });
    if settings.model.starts_with("o1") || settings.model.starts_with("gpt-5") {
        body["max_completion_tokens"] = json!(settings.max_tokens);
    } else {
        body["max_tokens"] = json!(settings.max_tokens);
        body["temperature"] = json!(settings.temperature);
    }
    body
}

fn streaming_not_permitted(body: &str) -> bool {
    body.to_ascii_lowercase().contains("organization must be verified")
        || body.contains("unsupported_value")
}

fn extract_error(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    Some(message)
}

fn truncate_for_error(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Incremental decoder for `data:` server-sent-event lines.
#[derive(Debug, Default)]
struct SseDecoder {
    pending: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns the text deltas completed by them.
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>, ModelError> {
        self.pending.extend_from_slice(bytes);
        let mut deltas = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(payload) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload == "[DONE]" {
                self.done = true;
                break;
            }
            let Ok(value) = serde_json::from_str::<Value>(payload) else {
                continue;
            };
            if let Some(detail) = extract_error(&value) {
                return Err(ModelError::Stream(detail));
            }
            let choices = value
                .get("choices")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for choice in choices {
                if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    deltas.push(text.to_string());
                }
            }
        }
        Ok(deltas)
    }
}
