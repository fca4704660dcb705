//! HTTP LLM client speaking the chat-completions wire format.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{CompletionRequest, CompletionResponse, FinishReason, TokenUsage};

/// LLM client trait. One call in, one text out; retry policy belongs to
/// the caller.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub default_model: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub total_timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            default_model: String::new(),
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            total_timeout_secs: 300,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_total_timeout(mut self, secs: u64) -> Self {
        self.total_timeout_secs = secs;
        self
    }
}

impl From<&LlmConfig> for ClientConfig {
    fn from(config: &LlmConfig) -> Self {
        Self::new(config.endpoint_url.clone(), config.api_key.clone())
            .with_default_model(config.default_model.clone())
    }
}

// Chat-completions wire types
#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseChunk {
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
    #[serde(default)]
    message: Option<ApiMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat endpoint. Consumes both plain
/// JSON bodies and SSE streams, whichever the server answers with.
pub struct HttpLlmClient {
    config: ClientConfig,
    http: Client,
}

impl HttpLlmClient {
    pub fn new(config: ClientConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .build()
            .unwrap_or_default();

        Self { config, http }
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(self.config.total_timeout_secs * 1000)
        } else {
            Error::transport(e.to_string())
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .params
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ApiMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let api_request = ApiRequest {
            model: model.clone(),
            messages,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            frequency_penalty: request.params.frequency_penalty,
            presence_penalty: request.params.presence_penalty,
            max_tokens: request.params.max_tokens,
            stream: false,
        };

        debug!(model = %model, prompt_chars = request.prompt.len(), "LLM request");

        let response = self
            .http
            .post(&self.config.endpoint_url)
            .bearer_auth(&self.config.api_key)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport_status(status.as_u16(), body));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let completion = if content_type.contains("text/event-stream") {
            info!("LLM answered with an SSE stream");
            let mut body = String::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| self.map_reqwest_error(e))?;
                body.push_str(&String::from_utf8_lossy(&chunk));
            }
            parse_sse_body(&body, &model)?
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| self.map_reqwest_error(e))?;
            parse_json_body(&body)?
        };

        if completion.text.trim().is_empty() {
            return Err(Error::Llm("endpoint returned no usable text".to_string()));
        }

        debug!(
            model = %completion.model,
            chars = completion.text.len(),
            "LLM response"
        );
        Ok(completion)
    }
}

fn parse_json_body(body: &str) -> Result<CompletionResponse> {
    let api: ApiResponse = serde_json::from_str(body)
        .map_err(|e| Error::Llm(format!("failed to parse completion body: {e}")))?;

    let choice = api
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Llm("no choices in completion body".to_string()))?;

    Ok(CompletionResponse {
        text: choice.message.content,
        model: api.model,
        usage: api.usage,
        finish_reason: choice
            .finish_reason
            .as_deref()
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Unknown),
    })
}

/// Concatenate `delta.content` fragments from an SSE body. `[DONE]` ends
/// the stream; non-JSON keep-alive lines are skipped.
fn parse_sse_body(body: &str, model: &str) -> Result<CompletionResponse> {
    let mut text = String::new();
    let mut finish_reason = FinishReason::Unknown;

    for line in body.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            break;
        }

        let Ok(chunk) = serde_json::from_str::<SseChunk>(data) else {
            continue;
        };
        for choice in chunk.choices {
            if let Some(content) = choice.delta.and_then(|d| d.content) {
                text.push_str(&content);
            } else if let Some(message) = choice.message {
                // Some servers put whole messages on the stream
                text.push_str(&message.content);
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                finish_reason = FinishReason::parse(reason);
            }
        }
    }

    Ok(CompletionResponse {
        text,
        model: model.to_string(),
        usage: TokenUsage::default(),
        finish_reason,
    })
}
