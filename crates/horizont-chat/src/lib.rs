//! Horizont chat crate - the "send message" pipeline.
//!
//! Drives one request from validated user text to a persisted assistant
//! reply: context assembly, the external completion call under a wall-clock
//! budget, chart extraction from the generated text and the fallback policy.

pub mod anthropic;
pub mod chart;
pub mod completion;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod presentation;
pub mod state;

pub use anthropic::AnthropicClient;
pub use chart::ChartExtractor;
pub use completion::{CompletionError, CompletionRequest, CompletionService};
pub use error::ChatError;
pub use orchestrator::{ConversationOrchestrator, DocumentText, SendOutcome};
pub use presentation::{build_presentation, Presentation};
pub use state::SendState;
