//! Per-request state machine for a send.
//!
//! Happy path:
//! Received -> Validated -> UserMsgPersisted -> ContextAssembled ->
//! CompletionInFlight -> CompletionReceived -> ChartParsed ->
//! AssistantMsgPersisted -> Responded
//!
//! A retry re-enters CompletionInFlight. A fallback reply stands in for a
//! received completion. ChartParsed may go straight to Responded when the
//! assistant message could not be stored.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where a send currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    Received,
    Validated,
    UserMsgPersisted,
    ContextAssembled,
    CompletionInFlight,
    CompletionReceived,
    ChartParsed,
    AssistantMsgPersisted,
    Responded,
    // Terminal failures
    ValidationFailed,
    PersistenceFailed,
    AuthFailed,
    TransientFailed,
    CompletionFailed,
    TimeoutExceeded,
}

impl SendState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SendState::Responded
                | SendState::ValidationFailed
                | SendState::PersistenceFailed
                | SendState::AuthFailed
                | SendState::TransientFailed
                | SendState::CompletionFailed
                | SendState::TimeoutExceeded
        )
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid send transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SendState,
    pub to: SendState,
}

/// Validate that a state change is allowed.
pub fn validate_transition(from: SendState, to: SendState) -> Result<(), InvalidTransition> {
    use SendState::*;

    let valid = matches!(
        (from, to),
        (Received, Validated)
            | (Received, ValidationFailed)
            | (Validated, UserMsgPersisted)
            | (Validated, PersistenceFailed)
            | (UserMsgPersisted, ContextAssembled)
            | (UserMsgPersisted, PersistenceFailed)
            | (UserMsgPersisted, TimeoutExceeded)
            | (ContextAssembled, CompletionInFlight)
            | (ContextAssembled, TimeoutExceeded)
            | (CompletionInFlight, CompletionInFlight)
            | (CompletionInFlight, CompletionReceived)
            | (CompletionInFlight, AuthFailed)
            | (CompletionInFlight, TransientFailed)
            | (CompletionInFlight, CompletionFailed)
            | (CompletionInFlight, TimeoutExceeded)
            | (CompletionReceived, ChartParsed)
            | (CompletionReceived, TimeoutExceeded)
            | (ChartParsed, AssistantMsgPersisted)
            | (ChartParsed, Responded)
            | (ChartParsed, TimeoutExceeded)
            | (AssistantMsgPersisted, Responded)
    );

    if valid {
        Ok(())
    } else {
        Err(InvalidTransition { from, to })
    }
}

/// Tracks the state path and wall-clock budget of one send.
#[derive(Debug)]
pub struct SendTracker {
    state: SendState,
    path: Vec<SendState>,
    started: Instant,
    budget: Duration,
}

impl SendTracker {
    pub fn new(budget: Duration) -> Self {
        Self {
            state: SendState::Received,
            path: vec![SendState::Received],
            started: Instant::now(),
            budget,
        }
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    /// Every state visited so far, starting with `Received`.
    pub fn path(&self) -> &[SendState] {
        &self.path
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left in the budget, or `None` once it is spent.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .checked_sub(self.elapsed())
            .filter(|left| !left.is_zero())
    }

    /// Move to `to`. An unexpected transition is logged and still recorded
    /// so the path reflects what actually happened.
    pub fn advance(&mut self, to: SendState) {
        if let Err(e) = validate_transition(self.state, to) {
            warn!(error = %e, "Unexpected send state transition");
        }
        debug!(from = %self.state, to = %to, elapsed_ms = self.elapsed().as_millis() as u64, "Send state");
        self.state = to;
        self.path.push(to);
    }
}
