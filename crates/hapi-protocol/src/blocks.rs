//! Renderable chat blocks produced by the timeline reducer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventContent;

/// One renderable unit of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChatBlock {
    UserText(TextBlock),
    AgentText(TextBlock),
    AgentReasoning(TextBlock),
    AgentEvent(EventBlock),
    CliOutput(CliOutputBlock),
    ToolCall(ToolCallBlock),
}

impl ChatBlock {
    pub fn id(&self) -> &str {
        match self {
            Self::UserText(block) | Self::AgentText(block) | Self::AgentReasoning(block) => {
                &block.id
            }
            Self::AgentEvent(block) => &block.id,
            Self::CliOutput(block) => &block.id,
            Self::ToolCall(block) => &block.id,
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            Self::UserText(block) | Self::AgentText(block) | Self::AgentReasoning(block) => {
                block.created_at
            }
            Self::AgentEvent(block) => block.created_at,
            Self::CliOutput(block) => block.created_at,
            Self::ToolCall(block) => block.created_at,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallBlock> {
        match self {
            Self::ToolCall(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_tool_call_mut(&mut self) -> Option<&mut ToolCallBlock> {
        match self {
            Self::ToolCall(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventBlock> {
        match self {
            Self::AgentEvent(block) => Some(block),
            _ => None,
        }
    }
}

/// Text authored by the user or the agent, or agent reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub created_at: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// A lifecycle event shown inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBlock {
    pub id: String,
    pub created_at: i64,
    pub event: EventContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Who produced a piece of CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliOutputSource {
    User,
    Assistant,
}

/// Terminal output echoed by the agent CLI (local commands and their stdout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliOutputBlock {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub created_at: i64,
    pub text: String,
    pub source: CliOutputSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Tool call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolState {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Permission decision status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    #[default]
    Pending,
    Approved,
    Denied,
    Canceled,
}

/// Permission state attached to a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPermission {
    pub id: String,
    pub status: PermissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

/// Stateful record tracking one tool invocation and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBlock {
    /// Tool call id; also the block id.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub created_at: i64,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<ToolPermission>,
    pub state: ToolState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Blocks of the sidechain this call spawned (Task calls only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChatBlock>,
}

impl ToolCallBlock {
    /// A pending block with no input yet.
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            local_id: None,
            created_at,
            name: name.into(),
            input: Value::Null,
            description: None,
            permission: None,
            state: ToolState::Pending,
            result: None,
            started_at: None,
            completed_at: None,
            children: Vec::new(),
        }
    }
}
