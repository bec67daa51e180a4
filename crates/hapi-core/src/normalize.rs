//! MessageNormalizer: backend wire content to [`NormalizedMessage`].
//!
//! Conversion is infallible. Records flagged as bookkeeping normalize to
//! `None`; anything that cannot be interpreted is kept as a text block
//! holding the pretty-printed payload.

use serde_json::{Value, json};
use tracing::{debug, trace};

use hapi_protocol::{
    AgentContent, AgentEvent, AgentRecordContent, CodexRecord, ContentBlock, EventContent,
    MessageBodyContent, MessageContent, NormalizedMessage, OutputMessage, OutputRecord,
    PlanRecord, RawMessage, RecordLineage, ResultPermissions, RoleWrappedRecord, SystemRecord,
    ToolCallContent, ToolResultContent, Usage, UserContent, UserRecordContent,
};

use crate::todos::{TODO_WRITE_TOOL, plan_todos};

/// Normalize one hub message.
///
/// Returns `None` only for records that are deliberately hidden (meta and
/// compact-summary records, non-error system records).
pub fn normalize_message(raw: &RawMessage) -> Option<NormalizedMessage> {
    let Some(record) = RoleWrappedRecord::unwrap_envelope(&raw.content) else {
        debug!(id = %raw.id, "no role envelope, keeping raw payload");
        return Some(raw_dump(raw));
    };

    match record.role.as_str() {
        "user" => match serde_json::from_value::<UserRecordContent>(record.content) {
            Ok(UserRecordContent::Text { text }) => {
                let mut message = base(raw, MessageContent::User(UserContent { text }));
                message.meta = record.meta;
                Some(message)
            }
            Err(err) => {
                debug!(id = %raw.id, error = %err, "unrecognized user record");
                Some(raw_dump(raw))
            }
        },
        "agent" | "assistant" => match serde_json::from_value::<AgentRecordContent>(record.content)
        {
            Ok(AgentRecordContent::Output(output)) => {
                normalize_output(raw, output).map(|mut message| {
                    message.meta = record.meta;
                    message
                })
            }
            Ok(AgentRecordContent::Event(event)) => {
                let mut message = base(raw, MessageContent::Event(EventContent::parse(event)));
                message.meta = record.meta;
                Some(message)
            }
            Ok(AgentRecordContent::Codex(codex)) => {
                let mut message = base(raw, MessageContent::Agent(normalize_codex(raw, codex)));
                message.meta = record.meta;
                Some(message)
            }
            Err(err) => {
                debug!(id = %raw.id, error = %err, "unrecognized agent record");
                Some(raw_dump(raw))
            }
        },
        role => {
            debug!(id = %raw.id, role, "unknown record role");
            Some(raw_dump(raw))
        }
    }
}

/// Normalize a batch, dropping hidden records.
pub fn normalize_messages<'a>(
    raw: impl IntoIterator<Item = &'a RawMessage>,
) -> Vec<NormalizedMessage> {
    raw.into_iter().filter_map(normalize_message).collect()
}

fn base(raw: &RawMessage, content: MessageContent) -> NormalizedMessage {
    NormalizedMessage {
        id: raw.id.clone(),
        local_id: raw.local_id.clone(),
        created_at: raw.created_at,
        content,
        is_sidechain: false,
        uuid: None,
        parent_uuid: None,
        usage: None,
        meta: None,
    }
}

fn with_lineage(mut message: NormalizedMessage, lineage: RecordLineage) -> NormalizedMessage {
    message.is_sidechain = lineage.is_sidechain;
    message.uuid = lineage.uuid;
    message.parent_uuid = lineage.parent_uuid;
    message
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Agent message holding the whole payload as text.
fn raw_dump(raw: &RawMessage) -> NormalizedMessage {
    base(
        raw,
        MessageContent::Agent(vec![AgentContent::Text {
            text: pretty(&raw.content),
        }]),
    )
}

// ============================================================================
// Output envelope
// ============================================================================

fn normalize_output(raw: &RawMessage, output: OutputRecord) -> Option<NormalizedMessage> {
    match output {
        OutputRecord::Assistant(message) => normalize_assistant(raw, message),
        OutputRecord::User(message) => normalize_user_output(raw, message),
        OutputRecord::Summary { summary, .. } => Some(base(
            raw,
            MessageContent::Agent(vec![AgentContent::Summary { summary }]),
        )),
        OutputRecord::System(system) => normalize_system(raw, system),
    }
}

fn normalize_assistant(raw: &RawMessage, output: OutputMessage) -> Option<NormalizedMessage> {
    if output.lineage.is_filtered() {
        trace!(id = %raw.id, "skipping meta assistant record");
        return None;
    }

    let content = match output.message.content {
        MessageBodyContent::Text(text) => vec![AgentContent::Text { text }],
        MessageBodyContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| convert_block(&raw.id, block))
            .collect(),
    };

    let mut message = base(raw, MessageContent::Agent(content));
    message.usage = output.message.usage.as_ref().and_then(Usage::from_value);
    Some(with_lineage(message, output.lineage))
}

fn normalize_user_output(raw: &RawMessage, output: OutputMessage) -> Option<NormalizedMessage> {
    if output.lineage.is_filtered() {
        trace!(id = %raw.id, "skipping meta user record");
        return None;
    }

    let content = match output.message.content {
        MessageBodyContent::Text(text) if output.lineage.is_sidechain => {
            MessageContent::Agent(vec![AgentContent::Sidechain { prompt: text }])
        }
        MessageBodyContent::Text(text) => MessageContent::User(UserContent { text }),
        MessageBodyContent::Blocks(blocks) => MessageContent::Agent(
            blocks
                .iter()
                .map(|block| convert_block(&raw.id, block))
                .collect(),
        ),
    };

    Some(with_lineage(base(raw, content), output.lineage))
}

fn normalize_system(raw: &RawMessage, system: SystemRecord) -> Option<NormalizedMessage> {
    if system.lineage.is_filtered() || system.subtype.as_deref() != Some("api_error") {
        trace!(id = %raw.id, subtype = ?system.subtype, "skipping system record");
        return None;
    }

    let event = AgentEvent::ApiError {
        retry_attempt: system.retry_attempt.unwrap_or_default(),
        max_retries: system.max_retries.unwrap_or_default(),
        error: system.error.unwrap_or(Value::Null),
    };
    Some(with_lineage(
        base(raw, MessageContent::Event(event.into())),
        system.lineage,
    ))
}

fn convert_block(message_id: &str, block: &Value) -> AgentContent {
    let Some(parsed) = ContentBlock::parse(block) else {
        debug!(id = message_id, kind = ?block.get("type"), "unknown content block");
        return AgentContent::Text {
            text: pretty(block),
        };
    };

    match parsed {
        ContentBlock::Text { text } => AgentContent::Text { text },
        ContentBlock::Thinking { thinking } => AgentContent::Reasoning { text: thinking },
        ContentBlock::ToolUse { id, name, input } => AgentContent::ToolCall(tool_call(id, name, input)),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
            permissions,
        } => AgentContent::ToolResult(ToolResultContent {
            tool_use_id,
            content,
            is_error: is_error.unwrap_or(false),
            permissions: permissions.as_ref().and_then(|value| {
                let parsed = ResultPermissions::from_value(value);
                if parsed.is_none() {
                    debug!(id = message_id, "dropping malformed permission annotation");
                }
                parsed
            }),
        }),
        ContentBlock::Image { source } => AgentContent::Image { source },
    }
}

fn tool_call(id: String, name: String, input: Value) -> ToolCallContent {
    let description = input
        .get("description")
        .and_then(Value::as_str)
        .map(String::from);
    ToolCallContent {
        id,
        name,
        input,
        description,
    }
}

// ============================================================================
// Codex turn envelope
// ============================================================================

fn normalize_codex(raw: &RawMessage, record: CodexRecord) -> Vec<AgentContent> {
    match record {
        CodexRecord::Message { message, .. } => vec![AgentContent::Text { text: message }],
        CodexRecord::Reasoning { message, .. } => vec![AgentContent::Reasoning { text: message }],
        CodexRecord::ToolCall {
            call_id,
            name,
            input,
            ..
        } => vec![AgentContent::ToolCall(tool_call(call_id, name, input))],
        CodexRecord::ToolCallResult {
            call_id,
            output,
            is_error,
            ..
        } => vec![AgentContent::ToolResult(ToolResultContent {
            tool_use_id: call_id,
            content: output,
            is_error: is_error.unwrap_or(false),
            permissions: None,
        })],
        CodexRecord::Plan(plan) => plan_as_todo_write(raw, plan),
    }
}

/// A plan update becomes a completed `TodoWrite` call.
fn plan_as_todo_write(raw: &RawMessage, plan: PlanRecord) -> Vec<AgentContent> {
    let call_id = plan
        .id
        .clone()
        .unwrap_or_else(|| format!("plan-{}", raw.id));
    let todos = plan_todos(&plan).unwrap_or_default();
    if todos.is_empty() {
        debug!(id = %raw.id, "plan carried no valid entries");
    }

    let todos = serde_json::to_value(&todos).unwrap_or_else(|_| Value::Array(Vec::new()));
    vec![
        AgentContent::ToolCall(ToolCallContent {
            id: call_id.clone(),
            name: TODO_WRITE_TOOL.to_string(),
            input: json!({ "todos": todos }),
            description: plan.explanation,
        }),
        AgentContent::ToolResult(ToolResultContent {
            tool_use_id: call_id,
            content: json!({ "success": true }),
            is_error: false,
            permissions: None,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hapi_protocol::Role;

    fn raw(id: &str, content: Value) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            seq: None,
            local_id: None,
            created_at: 1000,
            content,
        }
    }

    fn agent_output(data: Value) -> Value {
        json!({"role": "agent", "content": {"type": "output", "data": data}})
    }

    #[test]
    fn test_unrecognized_payload_is_dumped() {
        let content = json!({"unexpected": true, "nested": {"value": 1}});
        let message = normalize_message(&raw("m1", content.clone())).unwrap();

        assert_eq!(message.id, "m1");
        assert_eq!(message.role(), Role::Agent);
        assert_eq!(
            message.agent_content(),
            &[AgentContent::Text {
                text: serde_json::to_string_pretty(&content).unwrap()
            }]
        );
    }

    #[test]
    fn test_user_text_record() {
        let message = normalize_message(&raw(
            "u1",
            json!({"role": "user", "content": {"type": "text", "text": "hello"}, "meta": {"sentFrom": "web"}}),
        ))
        .unwrap();

        assert_eq!(
            message.content,
            MessageContent::User(UserContent {
                text: "hello".to_string()
            })
        );
        assert_eq!(message.meta, Some(json!({"sentFrom": "web"})));
    }

    #[test]
    fn test_assistant_blocks_and_usage() {
        let message = normalize_message(&raw(
            "a1",
            agent_output(json!({
                "type": "assistant",
                "uuid": "u1",
                "parentUuid": "u0",
                "message": {
                    "content": [
                        {"type": "thinking", "thinking": "hmm"},
                        {"type": "text", "text": "hi"},
                        {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls", "description": "List"}},
                        {"type": "server_tool_use", "id": "s1"}
                    ],
                    "usage": {"input_tokens": 5, "output_tokens": 7}
                }
            })),
        ))
        .unwrap();

        let content = message.agent_content();
        assert_eq!(content.len(), 4);
        assert_eq!(content[0], AgentContent::Reasoning { text: "hmm".to_string() });
        let AgentContent::ToolCall(call) = &content[2] else {
            panic!("Expected tool call");
        };
        assert_eq!(call.description.as_deref(), Some("List"));
        assert!(matches!(&content[3], AgentContent::Text { text } if text.contains("server_tool_use")));
        assert_eq!(message.usage.as_ref().map(|u| u.output_tokens), Some(7));
        assert_eq!(message.uuid.as_deref(), Some("u1"));
        assert_eq!(message.parent_uuid.as_deref(), Some("u0"));
    }

    #[test]
    fn test_usage_omitted_when_incomplete() {
        let message = normalize_message(&raw(
            "a1",
            agent_output(json!({
                "type": "assistant",
                "message": {"content": "hi", "usage": {"input_tokens": 5}}
            })),
        ))
        .unwrap();
        assert!(message.usage.is_none());
    }

    #[test]
    fn test_meta_records_are_filtered() {
        let meta = agent_output(json!({"type": "assistant", "isMeta": true, "message": {"content": "x"}}));
        let compact = agent_output(json!({"type": "user", "isCompactSummary": true, "message": {"content": "x"}}));
        assert!(normalize_message(&raw("m1", meta)).is_none());
        assert!(normalize_message(&raw("m2", compact)).is_none());
    }

    #[test]
    fn test_user_output_sidechain_prompt() {
        let message = normalize_message(&raw(
            "s1",
            agent_output(json!({
                "type": "user",
                "isSidechain": true,
                "uuid": "r1",
                "message": {"content": "Investigate"}
            })),
        ))
        .unwrap();

        assert!(message.is_sidechain);
        assert_eq!(message.sidechain_prompt(), Some("Investigate"));
    }

    #[test]
    fn test_tool_result_permissions() {
        let message = normalize_message(&raw(
            "r1",
            agent_output(json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "ok",
                     "permissions": {"date": 5, "result": "approved", "mode": "default"}},
                    {"type": "tool_result", "tool_use_id": "t2", "content": "x", "is_error": true,
                     "permissions": {"date": "yesterday", "result": "approved"}}
                ]}
            })),
        ))
        .unwrap();

        let content = message.agent_content();
        let AgentContent::ToolResult(first) = &content[0] else {
            panic!("Expected tool result");
        };
        assert!(first.permissions.is_some());
        let AgentContent::ToolResult(second) = &content[1] else {
            panic!("Expected tool result");
        };
        assert!(second.is_error);
        assert!(second.permissions.is_none());
    }

    #[test]
    fn test_system_records() {
        let api_error = agent_output(json!({
            "type": "system", "subtype": "api_error", "retryAttempt": 2, "maxRetries": 5, "error": {"status": 529}
        }));
        let message = normalize_message(&raw("e1", api_error)).unwrap();
        assert_eq!(
            message.content,
            MessageContent::Event(EventContent::Agent(AgentEvent::ApiError {
                retry_attempt: 2,
                max_retries: 5,
                error: json!({"status": 529}),
            }))
        );

        let init = agent_output(json!({"type": "system", "subtype": "init"}));
        assert!(normalize_message(&raw("e2", init)).is_none());
    }

    #[test]
    fn test_event_envelope() {
        let message = normalize_message(&raw(
            "e1",
            json!({"role": "agent", "content": {"type": "event", "data": {"type": "ready"}}}),
        ))
        .unwrap();
        assert_eq!(message.role(), Role::Event);
        assert!(matches!(message.content, MessageContent::Event(ref e) if e.is_ready()));
    }

    #[test]
    fn test_codex_tool_call_and_result() {
        let call = normalize_message(&raw(
            "c1",
            json!({"role": "agent", "content": {"type": "codex", "data": {
                "type": "tool-call", "callId": "call-1", "name": "shell", "input": {"command": ["ls"]}
            }}}),
        ))
        .unwrap();
        assert!(matches!(&call.agent_content()[0], AgentContent::ToolCall(c) if c.id == "call-1"));

        let result = normalize_message(&raw(
            "c2",
            json!({"role": "agent", "content": {"type": "codex", "data": {
                "type": "tool-call-result", "callId": "call-1", "output": "boom", "isError": true
            }}}),
        ))
        .unwrap();
        assert!(matches!(&result.agent_content()[0], AgentContent::ToolResult(r) if r.is_error));
    }

    #[test]
    fn test_codex_plan_becomes_todo_write() {
        let message = normalize_message(&raw(
            "p1",
            json!({"role": "agent", "content": {"type": "codex", "data": {
                "type": "plan",
                "plan": [{"step": "Inspect", "status": "completed"}, {"step": "Fix", "status": "in_progress"}]
            }}}),
        ))
        .unwrap();

        let content = message.agent_content();
        assert_eq!(content.len(), 2);
        let AgentContent::ToolCall(call) = &content[0] else {
            panic!("Expected TodoWrite call");
        };
        assert_eq!(call.name, "TodoWrite");
        assert_eq!(call.id, "plan-p1");
        assert_eq!(call.input["todos"][1]["status"], "in_progress");
        let AgentContent::ToolResult(result) = &content[1] else {
            panic!("Expected TodoWrite result");
        };
        assert_eq!(result.tool_use_id, "plan-p1");
        assert_eq!(result.content, json!({"success": true}));
    }

    #[test]
    fn test_nested_envelope_and_unknown_role() {
        let nested = normalize_message(&raw(
            "n1",
            json!({"data": {"message": {"role": "user", "content": {"type": "text", "text": "hey"}}}}),
        ))
        .unwrap();
        assert_eq!(nested.role(), Role::User);

        let unknown = normalize_message(&raw("n2", json!({"role": "system", "content": "x"}))).unwrap();
        assert_eq!(unknown.role(), Role::Agent);
    }
}
