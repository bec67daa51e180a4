//! Lifecycle events emitted by agents alongside conversation output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known agent lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// Permission mode switched.
    Switch { mode: String },
    /// Free-form status line.
    Message { message: String },
    /// Usage limit hit; resumes at `ends_at` (unix seconds).
    LimitReached {
        #[serde(rename = "endsAt")]
        ends_at: i64,
    },
    /// The agent finished its current turn.
    Ready,
    /// Session title changed (synthesized from the title tool call).
    TitleChanged { title: String },
    /// Upstream API failure, possibly retried.
    ApiError {
        #[serde(rename = "retryAttempt", default)]
        retry_attempt: u32,
        #[serde(rename = "maxRetries", default)]
        max_retries: u32,
        #[serde(default)]
        error: Value,
    },
}

impl AgentEvent {
    /// Text shown for this event, where one exists.
    pub fn display_text(&self) -> Option<String> {
        match self {
            Self::Switch { mode } => Some(format!("Switched to {mode} mode")),
            Self::Message { message } => Some(message.clone()),
            Self::TitleChanged { title } => Some(format!("Title changed to \"{title}\"")),
            Self::LimitReached { .. } | Self::Ready | Self::ApiError { .. } => None,
        }
    }
}

/// Event payload as carried by an `event`-role message.
///
/// Unknown event types are kept verbatim so they still render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventContent {
    Agent(AgentEvent),
    Raw(Value),
}

impl EventContent {
    pub fn parse(value: Value) -> Self {
        match serde_json::from_value::<AgentEvent>(value.clone()) {
            Ok(event) => Self::Agent(event),
            Err(_) => Self::Raw(value),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Agent(AgentEvent::Ready))
    }

    pub fn as_agent(&self) -> Option<&AgentEvent> {
        match self {
            Self::Agent(event) => Some(event),
            Self::Raw(_) => None,
        }
    }
}

impl From<AgentEvent> for EventContent {
    fn from(event: AgentEvent) -> Self {
        Self::Agent(event)
    }
}
