//! Normalized message union.
//!
//! Every backend format is mapped onto [`NormalizedMessage`]. Downstream
//! stages (tracer, reducer) only ever see this shape.

use std::ops::Deref;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::EventContent;

/// Normalized message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Event,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A message after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    /// Unique within the session transcript.
    pub id: String,

    /// Client-side correlation id for not-yet-confirmed sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,

    /// Unix milliseconds.
    pub created_at: i64,

    /// Role plus role-specific content.
    #[serde(flatten)]
    pub content: MessageContent,

    #[serde(default)]
    pub is_sidechain: bool,

    /// Backend record uuid, used to link sidechain chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Uuid of the record this one continues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl NormalizedMessage {
    pub fn role(&self) -> Role {
        self.content.role()
    }

    /// Agent content blocks; empty for user and event messages.
    pub fn agent_content(&self) -> &[AgentContent] {
        match &self.content {
            MessageContent::Agent(blocks) => blocks,
            MessageContent::User(_) | MessageContent::Event(_) => &[],
        }
    }

    /// Prompt of the `sidechain` block this message opens with, if any.
    pub fn sidechain_prompt(&self) -> Option<&str> {
        self.agent_content().iter().find_map(|content| match content {
            AgentContent::Sidechain { prompt } => Some(prompt.as_str()),
            _ => None,
        })
    }
}

/// Role-specific content, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "lowercase")]
pub enum MessageContent {
    User(UserContent),
    Agent(Vec<AgentContent>),
    Event(EventContent),
}

impl MessageContent {
    pub fn role(&self) -> Role {
        match self {
            Self::User(_) => Role::User,
            Self::Agent(_) => Role::Agent,
            Self::Event(_) => Role::Event,
        }
    }
}

/// User-authored text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContent {
    pub text: String,
}

/// One block of agent content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentContent {
    Text { text: String },
    Reasoning { text: String },
    ToolCall(ToolCallContent),
    ToolResult(ToolResultContent),
    Image { source: Value },
    Summary { summary: String },
    /// Opening prompt of a delegated sub-agent stream.
    Sidechain { prompt: String },
}

/// A tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolCallContent {
    /// `input.prompt`, used to match Task calls with their sidechains.
    pub fn prompt(&self) -> Option<&str> {
        self.input.get("prompt").and_then(Value::as_str)
    }
}

/// The result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub tool_use_id: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<ResultPermissions>,
}

/// Outcome recorded in a tool result's permission annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionResult {
    Approved,
    Denied,
}

/// Permission annotation embedded in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPermissions {
    /// Unix milliseconds of the decision.
    pub date: i64,
    pub result: PermissionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

impl ResultPermissions {
    /// Accept an annotation only with a numeric `date` and a `result` of
    /// exactly `approved` or `denied`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let date = obj.get("date")?.as_f64()? as i64;
        let result = match obj.get("result")?.as_str()? {
            "approved" => PermissionResult::Approved,
            "denied" => PermissionResult::Denied,
            _ => return None,
        };
        let allowed_tools = obj.get("allowedTools").and_then(Value::as_array).map(|tools| {
            tools
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        });

        Some(Self {
            date,
            result,
            mode: obj.get("mode").and_then(Value::as_str).map(String::from),
            allowed_tools,
            decision: obj.get("decision").and_then(Value::as_str).map(String::from),
        })
    }
}

/// Token usage for an agent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_tier: Option<String>,
}

impl Usage {
    /// Usage is only reported when both token counts are present and numeric.
    pub fn from_value(value: &Value) -> Option<Self> {
        let count = |key: &str| value.get(key).and_then(Value::as_f64).map(|n| n.max(0.0) as u64);

        Some(Self {
            input_tokens: count("input_tokens")?,
            output_tokens: count("output_tokens")?,
            cache_creation_input_tokens: count("cache_creation_input_tokens"),
            cache_read_input_tokens: count("cache_read_input_tokens"),
            service_tier: value
                .get("service_tier")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

/// A normalized message tagged with the sidechain it belongs to.
///
/// `sidechain_id` is the id of the message that issued the Task call which
/// spawned the sidechain. It is assigned once by the tracer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedMessage {
    #[serde(flatten)]
    pub message: NormalizedMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidechain_id: Option<String>,
}

impl TracedMessage {
    pub fn top_level(message: NormalizedMessage) -> Self {
        Self {
            message,
            sidechain_id: None,
        }
    }

    pub fn in_sidechain(message: NormalizedMessage, sidechain_id: impl Into<String>) -> Self {
        Self {
            message,
            sidechain_id: Some(sidechain_id.into()),
        }
    }
}

impl Deref for TracedMessage {
    type Target = NormalizedMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_requires_both_counts() {
        assert!(Usage::from_value(&json!({"input_tokens": 10})).is_none());
        assert!(Usage::from_value(&json!({"input_tokens": "10", "output_tokens": 2})).is_none());

        let usage = Usage::from_value(&json!({
            "input_tokens": 10,
            "output_tokens": 2,
            "cache_read_input_tokens": 5,
            "service_tier": "standard"
        }))
        .unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.cache_read_input_tokens, Some(5));
        assert_eq!(usage.cache_creation_input_tokens, None);
        assert_eq!(usage.service_tier.as_deref(), Some("standard"));
    }

    #[test]
    fn test_result_permissions_validation() {
        assert!(ResultPermissions::from_value(&json!({"result": "approved"})).is_none());
        assert!(ResultPermissions::from_value(&json!({"date": "x", "result": "approved"})).is_none());
        assert!(ResultPermissions::from_value(&json!({"date": 1, "result": "maybe"})).is_none());

        let perms = ResultPermissions::from_value(&json!({
            "date": 1700000000000_i64,
            "result": "denied",
            "mode": "default",
            "allowedTools": ["Bash", 3]
        }))
        .unwrap();
        assert_eq!(perms.result, PermissionResult::Denied);
        assert_eq!(perms.date, 1700000000000);
        assert_eq!(perms.allowed_tools, Some(vec!["Bash".to_string()]));
    }

    #[test]
    fn test_message_serialization_flattens_role() {
        let msg = NormalizedMessage {
            id: "m1".to_string(),
            local_id: None,
            created_at: 1,
            content: MessageContent::User(UserContent {
                text: "hello".to_string(),
            }),
            is_sidechain: false,
            uuid: None,
            parent_uuid: None,
            usage: None,
            meta: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"]["text"], "hello");
        assert_eq!(json["createdAt"], 1);
        assert_eq!(msg.role(), Role::User);
    }

    #[test]
    fn test_agent_content_tags() {
        let json = serde_json::to_value(AgentContent::ToolCall(ToolCallContent {
            id: "t1".to_string(),
            name: "Task".to_string(),
            input: json!({"prompt": "X"}),
            description: None,
        }))
        .unwrap();
        assert_eq!(json["type"], "tool-call");
        assert_eq!(json["name"], "Task");
    }
}
