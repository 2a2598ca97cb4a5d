//! Conversation orchestrator: drives one "send message" request.
//!
//! Validates the text, stores the user message, assembles the bounded
//! context window, calls the completion service under the send budget (with
//! one retry for transient failures), extracts chart data and stores the
//! assistant reply. No chat state is held here; everything goes through the
//! stores.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use horizont_core::config::{ChatConfig, HorizontConfig};
use horizont_core::types::{Attachment, ChartSpec, ChatId, Message, NewMessage, Role};
use horizont_storage::{ChatStore, PromptRegistry};

use crate::chart::ChartExtractor;
use crate::completion::{CompletionError, CompletionRequest, CompletionService, Turn};
use crate::error::ChatError;
use crate::fallback::{self, DEFAULT_SYSTEM_PROMPT, FALLBACK_REPLY};
use crate::state::{SendState, SendTracker};

/// Text extracted from a document attached to this turn.
///
/// The text is forwarded upstream once; only name, type and size are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentText {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub text: String,
}

/// What a successful send produced.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub chat_id: ChatId,
    /// Reply text as stored (chart markers removed when a chart was found).
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
    pub user_seq: i64,
    /// `None` when the assistant message could not be stored.
    pub assistant_seq: Option<i64>,
    /// Error class that was answered with the static fallback reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_warning: Option<String>,
    pub path: Vec<SendState>,
}

/// Coordinates the stores, the completion service and the chart extractor.
pub struct ConversationOrchestrator {
    chats: Arc<ChatStore>,
    prompts: Arc<PromptRegistry>,
    completion: Arc<dyn CompletionService>,
    extractor: ChartExtractor,
    config: ChatConfig,
    max_output_tokens: u32,
    request_timeout: Duration,
}

impl ConversationOrchestrator {
    pub fn new(
        chats: Arc<ChatStore>,
        prompts: Arc<PromptRegistry>,
        completion: Arc<dyn CompletionService>,
        config: &HorizontConfig,
    ) -> Self {
        Self {
            chats,
            prompts,
            completion,
            extractor: ChartExtractor::new(),
            config: config.chat.clone(),
            max_output_tokens: config.completion.max_output_tokens,
            request_timeout: config.completion.request_timeout(),
        }
    }

    /// Handle one user message for `chat_id`.
    ///
    /// Either the transcript gains the user message and a reply, or a single
    /// classified error is returned. Validation failures write nothing; every
    /// later failure leaves the committed user message in place.
    pub async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        documents: Vec<DocumentText>,
    ) -> Result<SendOutcome, ChatError> {
        let mut tracker = SendTracker::new(self.config.send_budget());

        // Validated
        if let Err(e) = self.validate(text) {
            tracker.advance(SendState::ValidationFailed);
            warn!(chat_id = %chat_id, error = %e, "Rejected message");
            return Err(e);
        }
        tracker.advance(SendState::Validated);

        // UserMsgPersisted
        let user_message = NewMessage {
            content: text.to_string(),
            chart: None,
            attachments: documents
                .iter()
                .map(|doc| Attachment {
                    name: doc.name.clone(),
                    mime_type: doc.mime_type.clone(),
                    size_bytes: doc.size_bytes,
                })
                .collect(),
        };
        let user_seq = match self.chats.append_message(chat_id, Role::User, user_message) {
            Ok(message) => message.seq,
            Err(e) => {
                tracker.advance(SendState::PersistenceFailed);
                warn!(chat_id = %chat_id, error = %e, "Failed to store user message");
                return Err(e.into());
            }
        };
        tracker.advance(SendState::UserMsgPersisted);
        self.checkpoint(&mut tracker)?;

        // ContextAssembled
        let request = match self.assemble(chat_id, text, &documents, &tracker) {
            Ok(request) => request,
            Err(e) => {
                tracker.advance(SendState::PersistenceFailed);
                warn!(chat_id = %chat_id, error = %e, "Failed to assemble context");
                return Err(e);
            }
        };
        tracker.advance(SendState::ContextAssembled);
        self.checkpoint(&mut tracker)?;

        // CompletionInFlight / CompletionReceived
        tracker.advance(SendState::CompletionInFlight);
        let (reply_text, degraded) = match self.complete_with_retry(request, &mut tracker).await {
            Ok(text) => (text, None),
            Err(e) if self.config.fallback_enabled && fallback::is_recoverable(&e) => {
                warn!(chat_id = %chat_id, error = %e, class = e.class(), "Answering with fallback reply");
                (FALLBACK_REPLY.to_string(), Some(e.class()))
            }
            Err(e) => {
                tracker.advance(failure_state(&e));
                warn!(chat_id = %chat_id, error = %e, class = e.class(), "Completion failed");
                return Err(e);
            }
        };
        tracker.advance(SendState::CompletionReceived);

        // ChartParsed
        let extraction = self.extractor.extract_and_strip(&reply_text);
        tracker.advance(SendState::ChartParsed);
        self.checkpoint(&mut tracker)?;

        // AssistantMsgPersisted
        let assistant = NewMessage {
            content: extraction.text.clone(),
            chart: extraction.chart.clone(),
            attachments: Vec::new(),
        };
        let (assistant_seq, persistence_warning) =
            match self.chats.append_message(chat_id, Role::Assistant, assistant) {
                Ok(message) => {
                    tracker.advance(SendState::AssistantMsgPersisted);
                    (Some(message.seq), None)
                }
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "Reply produced but not stored");
                    (None, Some(e.to_string()))
                }
            };

        tracker.advance(SendState::Responded);
        info!(
            chat_id = %chat_id,
            chart = extraction.chart.is_some(),
            degraded = degraded.is_some(),
            elapsed_ms = tracker.elapsed().as_millis() as u64,
            "Reply produced"
        );

        Ok(SendOutcome {
            chat_id,
            reply: extraction.text,
            chart: extraction.chart,
            user_seq,
            assistant_seq,
            degraded,
            persistence_warning,
            path: tracker.path().to_vec(),
        })
    }

    fn validate(&self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > self.config.max_message_chars {
            return Err(ChatError::MessageTooLong(self.config.max_message_chars));
        }
        Ok(())
    }

    /// Build the completion request from the stored transcript.
    fn assemble(
        &self,
        chat_id: ChatId,
        text: &str,
        documents: &[DocumentText],
        tracker: &SendTracker,
    ) -> Result<CompletionRequest, ChatError> {
        let transcript = self.chats.list_messages(chat_id)?;

        if transcript.len() == 1 {
            let title = title_from(text, self.config.title_max_chars);
            if let Err(e) = self.chats.rename(chat_id, &title) {
                warn!(chat_id = %chat_id, error = %e, "Failed to retitle chat");
            }
        }

        let mut turns = context_window(&transcript, self.config.context_window);
        if let Some(last) = turns.last_mut() {
            last.content
                .push_str(&attachment_context(documents, self.config.attachment_max_chars));
        }

        let system = self
            .prompts
            .get_active()?
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let max_latency = tracker
            .remaining()
            .map_or(Duration::ZERO, |left| left.min(self.request_timeout));

        Ok(CompletionRequest {
            system,
            turns,
            max_output_tokens: self.max_output_tokens,
            max_latency,
        })
    }

    /// Call the service, retrying once after the backoff on a transient
    /// failure. Auth failures are returned immediately.
    async fn complete_with_retry(
        &self,
        request: CompletionRequest,
        tracker: &mut SendTracker,
    ) -> Result<String, ChatError> {
        match self.call_once(&request, tracker).await {
            Err(ChatError::TransientFailed(reason)) => {
                let backoff = self.config.retry_backoff();
                warn!(reason = %reason, attempt = 1, backoff_ms = backoff.as_millis() as u64, "Retrying completion");
                match tracker.remaining() {
                    Some(left) if left > backoff => tokio::time::sleep(backoff).await,
                    _ => return Err(self.timeout(tracker)),
                }
                tracker.advance(SendState::CompletionInFlight);
                self.call_once(&request, tracker).await
            }
            other => other,
        }
    }

    async fn call_once(
        &self,
        request: &CompletionRequest,
        tracker: &SendTracker,
    ) -> Result<String, ChatError> {
        let Some(left) = tracker.remaining() else {
            return Err(self.timeout(tracker));
        };

        let attempt = CompletionRequest {
            max_latency: request.max_latency.min(left),
            ..request.clone()
        };
        match tokio::time::timeout(left, self.completion.complete(&attempt)).await {
            Err(_) => Err(self.timeout(tracker)),
            Ok(Err(CompletionError::Auth(reason))) => Err(ChatError::AuthFailed(reason)),
            Ok(Err(CompletionError::Transient(reason))) => Err(ChatError::TransientFailed(reason)),
            Ok(Err(CompletionError::Other(reason))) => Err(ChatError::CompletionFailed(reason)),
            Ok(Ok(reply)) => {
                let text = reply.text();
                if text.trim().is_empty() {
                    Err(ChatError::CompletionFailed("reply had no text".to_string()))
                } else {
                    Ok(text)
                }
            }
        }
    }

    /// Abort with `TimeoutExceeded` once the budget is spent.
    fn checkpoint(&self, tracker: &mut SendTracker) -> Result<(), ChatError> {
        if tracker.remaining().is_some() {
            return Ok(());
        }
        tracker.advance(SendState::TimeoutExceeded);
        let err = self.timeout(tracker);
        warn!(error = %err, elapsed_ms = tracker.elapsed().as_millis() as u64, "Send budget exhausted");
        Err(err)
    }

    fn timeout(&self, tracker: &SendTracker) -> ChatError {
        ChatError::TimeoutExceeded {
            budget_ms: tracker.budget().as_millis() as u64,
        }
    }
}

fn failure_state(err: &ChatError) -> SendState {
    match err {
        ChatError::AuthFailed(_) => SendState::AuthFailed,
        ChatError::TransientFailed(_) => SendState::TransientFailed,
        ChatError::TimeoutExceeded { .. } => SendState::TimeoutExceeded,
        _ => SendState::CompletionFailed,
    }
}

/// The most recent `window` messages as completion turns.
fn context_window(transcript: &[Message], window: usize) -> Vec<Turn> {
    let start = transcript.len().saturating_sub(window);
    transcript[start..]
        .iter()
        .map(|message| Turn {
            role: message.role,
            content: message.content.clone(),
        })
        .collect()
}

/// One `[Arquivo anexado]` header followed by every non-empty document body.
/// Empty when there is nothing to forward.
fn attachment_context(documents: &[DocumentText], max_chars: usize) -> String {
    let bodies: String = documents
        .iter()
        .filter(|doc| !doc.text.trim().is_empty())
        .map(|doc| {
            format!(
                "\n\nConteúdo do PDF {}:\n{}",
                doc.name,
                truncate_chars(&doc.text, max_chars)
            )
        })
        .collect();
    if bodies.is_empty() {
        String::new()
    } else {
        format!("\n\n[Arquivo anexado]{}", bodies)
    }
}

/// Chat title derived from the first user message.
pub fn title_from(text: &str, max_chars: usize) -> String {
    truncate_chars(text.trim(), max_chars)
}

/// First `max_chars` characters, with `...` appended when anything was cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
