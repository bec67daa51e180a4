//! Raw envelopes as relayed by the hub.
//!
//! Every message the hub stores has an opaque `content` value. Agents wrap
//! their output in a role record (`{role, content, meta?}`) whose content is
//! one of the tagged unions below. Parsing is deliberately lenient: anything
//! that fails to match is handed back to the normalizer, which dumps it as
//! text instead of dropping it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Hub message
// ============================================================================

/// A session message as delivered by the hub, after decryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    /// Unique within the session transcript.
    pub id: String,

    /// Session sequence number assigned by the hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,

    /// Client-side correlation id for sends that are not yet confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,

    /// Unix milliseconds.
    pub created_at: i64,

    /// Opaque payload, usually a [`RoleWrappedRecord`].
    pub content: Value,
}

/// `{role, content, meta?}` record carried inside [`RawMessage::content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleWrappedRecord {
    pub role: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl RoleWrappedRecord {
    /// Locate a role record directly, or nested under `message`,
    /// `data.message` or `payload.message`.
    pub fn unwrap_envelope(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let candidates = [
            Some(value),
            obj.get("message"),
            obj.get("data").and_then(|data| data.get("message")),
            obj.get("payload").and_then(|payload| payload.get("message")),
        ];

        candidates
            .into_iter()
            .flatten()
            .find(|candidate| is_role_wrapped(candidate))
            .and_then(|record| serde_json::from_value(record.clone()).ok())
    }
}

fn is_role_wrapped(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let has_role = obj
        .get("role")
        .and_then(Value::as_str)
        .is_some_and(|role| !role.is_empty());
    has_role && obj.contains_key("content")
}

// ============================================================================
// Record content
// ============================================================================

/// Content of a `role: "user"` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UserRecordContent {
    Text { text: String },
}

/// Content of a `role: "agent"` record: one variant per top-level kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AgentRecordContent {
    /// Generic output envelope (Claude-style sub-records).
    Output(OutputRecord),
    /// Lifecycle event; parsed further by [`crate::EventContent::parse`].
    Event(Value),
    /// Turn envelope emitted by the Codex backend.
    Codex(CodexRecord),
}

// ============================================================================
// Output envelope
// ============================================================================

/// Sub-record of the generic output envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputRecord {
    Assistant(OutputMessage),
    User(OutputMessage),
    Summary {
        summary: String,
        #[serde(rename = "leafUuid", default, skip_serializing_if = "Option::is_none")]
        leaf_uuid: Option<String>,
    },
    System(SystemRecord),
}

/// Lineage and filtering flags shared by output sub-records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordLineage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub is_meta: bool,
    #[serde(default)]
    pub is_compact_summary: bool,
}

impl RecordLineage {
    /// Meta and compact-summary records are bookkeeping, not conversation.
    pub fn is_filtered(&self) -> bool {
        self.is_meta || self.is_compact_summary
    }
}

/// Assistant or user sub-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    #[serde(flatten)]
    pub lineage: RecordLineage,
    #[serde(default)]
    pub message: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_result: Option<Value>,
}

/// The model-facing message inside an output sub-record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: MessageBodyContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// Message content is either a bare string or a list of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBodyContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl Default for MessageBodyContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

/// One content block of an output message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        permissions: Option<Value>,
    },
    Image {
        source: Value,
    },
}

impl ContentBlock {
    /// Parse a single block; `None` when the block type is not recognized.
    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// System sub-record. Only `api_error` is surfaced to the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(flatten)]
    pub lineage: RecordLineage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

// ============================================================================
// Codex turn envelope
// ============================================================================

/// Sub-kinds of the Codex turn envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CodexRecord {
    Message {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Reasoning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolCall {
        #[serde(rename = "callId")]
        call_id: String,
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ToolCallResult {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(default)]
        output: Value,
        #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Plan(PlanRecord),
}

/// A plan update. Backends disagree on the shape, so both known layouts are
/// kept raw and validated by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    /// ACP-style `[{content, priority, status, id?}]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<Value>>,
    /// Step-style `[{step, status}]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}
