//! Anthropic Messages API client.
//!
//! Sends non-streaming requests to `/v1/messages`. Failures are classified
//! into auth / transient / other so the orchestrator can decide whether to
//! retry. The API key lives in a [`SecretString`] and is only exposed when
//! building the request headers.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use horizont_core::config::CompletionConfig;
use horizont_core::error::HorizontError;
use horizont_core::types::Role;

use crate::completion::{
    CompletionError, CompletionReply, CompletionRequest, CompletionService, ContentBlock,
};

const API_VERSION: &str = "2023-06-01";

/// Request body for `/v1/messages`.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Production completion service backed by Anthropic Claude.
///
/// Deliberately not `Debug`.
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: SecretString, config: &CompletionConfig) -> Result<Self, HorizontError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| HorizontError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_output_tokens,
            system: Some(request.system.as_str()).filter(|system| !system.is_empty()),
            // The Messages API expects the conversation to open with a user turn.
            messages: request
                .turns
                .iter()
                .skip_while(|turn| turn.role == Role::Assistant)
                .map(|turn| WireMessage {
                    role: turn.role.as_str(),
                    content: &turn.content,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl CompletionService for AnthropicClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReply, CompletionError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, turns = request.turns.len(), "Dispatching completion request");

        let response = self
            .client
            .post(&url)
            .timeout(request.max_latency)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.body(request))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Other(format!("failed to parse response: {}", e)))?;

        Ok(CompletionReply {
            blocks: parsed.content,
        })
    }
}

fn classify_transport(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        CompletionError::Transient(format!("HTTP request failed: {}", err))
    } else {
        CompletionError::Other(format!("HTTP request failed: {}", err))
    }
}

/// Map a non-success HTTP status to a completion error class.
fn classify_status(status: u16, body: String) -> CompletionError {
    let message = format!("HTTP {}: {}", status, body);
    match status {
        401 | 403 => CompletionError::Auth(message),
        408 | 409 | 429 | 500..=599 => CompletionError::Transient(message),
        _ => CompletionError::Other(message),
    }
}
