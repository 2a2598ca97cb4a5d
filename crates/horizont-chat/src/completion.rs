//! Contract with the external completion service.
//!
//! - `CompletionService` is the seam the orchestrator calls through.
//! - `AnthropicClient` (see `anthropic`) is the production implementation.
//! - `ScriptedCompletion` replays a fixed script of replies and failures for
//!   tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use horizont_core::types::Role;

/// One turn of the outgoing conversation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Everything a completion call needs: instructions, window and ceilings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub turns: Vec<Turn>,
    pub max_output_tokens: u32,
    pub max_latency: Duration,
}

/// A block of generated content.
///
/// Only text blocks carry anything the pipeline uses; blocks of any other
/// type decode as `Unknown` and are skipped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Generated reply as returned by the service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionReply {
    pub blocks: Vec<ContentBlock>,
}

impl CompletionReply {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Unknown => None,
            })
            .collect()
    }
}

/// Classified failure of one completion attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    /// Credentials rejected; never retried.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Connectivity problem, overload or rate limit; retried once.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("completion error: {0}")]
    Other(String),
}

/// External generative-text provider.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionReply, CompletionError>;
}

// ---------------------------------------------------------------------------
// ScriptedCompletion - deterministic replies for testing
// ---------------------------------------------------------------------------

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Fail(CompletionError),
    /// Reply after sleeping for the given duration.
    Slow(Duration, String),
}

/// Completion service that plays back a script, one step per call.
///
/// Every request is recorded so tests can inspect the window that was sent.
/// An exhausted script answers with `CompletionError::Other`.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script with a single reply.
    pub fn replying(text: &str) -> Self {
        Self::new([ScriptStep::Reply(text.to_string())])
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests().len()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReply, CompletionError> {
        let step = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|e| CompletionError::Other(format!("script lock poisoned: {}", e)))?;
            requests.push(request.clone());
            let mut script = self
                .script
                .lock()
                .map_err(|e| CompletionError::Other(format!("script lock poisoned: {}", e)))?;
            script.pop_front()
        };

        match step {
            Some(ScriptStep::Reply(text)) => Ok(CompletionReply::from_text(text)),
            Some(ScriptStep::Fail(err)) => Err(err),
            Some(ScriptStep::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(CompletionReply::from_text(text))
            }
            None => Err(CompletionError::Other("script exhausted".to_string())),
        }
    }
}
