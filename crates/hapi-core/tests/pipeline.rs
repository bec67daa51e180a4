//! End-to-end tests over raw hub messages.

use hapi_core::{
    TimelineOptions, build_timeline, normalize_message, normalize_messages, reduce_chat_blocks,
    trace_messages,
};
use hapi_protocol::{AgentContent, AgentState, ChatBlock, RawMessage, ToolState};
use serde_json::{Value, json};

fn raw(id: &str, created_at: i64, content: Value) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        seq: None,
        local_id: None,
        created_at,
        content,
    }
}

fn output(data: Value) -> Value {
    json!({"role": "agent", "content": {"type": "output", "data": data}})
}

fn assistant_blocks(uuid: &str, blocks: Value) -> Value {
    output(json!({
        "type": "assistant",
        "uuid": uuid,
        "message": {"content": blocks}
    }))
}

fn task_call(id: &str, prompt: &str) -> Value {
    json!([{"type": "tool_use", "id": id, "name": "Task", "input": {"prompt": prompt, "description": "delegate"}}])
}

fn sidechain_root(uuid: &str, prompt: &str) -> Value {
    output(json!({
        "type": "user",
        "isSidechain": true,
        "uuid": uuid,
        "parentUuid": null,
        "message": {"content": prompt}
    }))
}

fn sidechain_reply(uuid: &str, parent: &str, text: &str) -> Value {
    output(json!({
        "type": "assistant",
        "isSidechain": true,
        "uuid": uuid,
        "parentUuid": parent,
        "message": {"content": [{"type": "text", "text": text}]}
    }))
}

#[test]
fn test_unrecognized_envelope_is_dumped_verbatim() {
    let content = json!({"unexpected": true, "nested": {"value": 1}});
    let message = normalize_message(&raw("m-42", 0, content.clone())).unwrap();

    assert_eq!(message.id, "m-42");
    assert_eq!(
        message.agent_content(),
        &[AgentContent::Text {
            text: serde_json::to_string_pretty(&content).unwrap()
        }]
    );
}

#[test]
fn test_out_of_order_sidechain_resolves_to_task() {
    let messages = vec![
        raw("T1", 1, assistant_blocks("a1", task_call("task-1", "X"))),
        raw("S2", 2, sidechain_reply("s2", "s1", "child arrived first")),
        raw("S1", 3, sidechain_root("s1", "X")),
    ];

    let traced = trace_messages(normalize_messages(&messages), &TimelineOptions::default());
    for id in ["S1", "S2"] {
        let message = traced.iter().find(|m| m.id == id).unwrap();
        assert_eq!(message.sidechain_id.as_deref(), Some("T1"), "{id}");
    }
}

#[test]
fn test_bash_error_result() {
    let messages = vec![
        raw(
            "m1",
            1,
            assistant_blocks(
                "a1",
                json!([{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "false"}}]),
            ),
        ),
        raw(
            "m2",
            2,
            output(json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "exit 1", "is_error": true}
                ]}
            })),
        ),
    ];

    let result = build_timeline(&messages, None, &TimelineOptions::default());
    let block = result.tool_block("t1").unwrap();
    assert_eq!(block.state, ToolState::Error);
    assert_eq!(block.completed_at, Some(2));
}

#[test]
fn test_task_tree_with_children() {
    let messages = vec![
        raw("U1", 0, json!({"role": "user", "content": {"type": "text", "text": "look into it"}})),
        raw("T1", 1, assistant_blocks("a1", task_call("task-1", "Investigate"))),
        raw("S1", 2, sidechain_root("s1", "Investigate")),
        raw("S2", 3, sidechain_reply("s2", "s1", "found it")),
        raw(
            "R1",
            4,
            output(json!({
                "type": "user",
                "message": {"content": [{"type": "tool_result", "tool_use_id": "task-1", "content": "done"}]}
            })),
        ),
        raw("E1", 5, json!({"role": "agent", "content": {"type": "event", "data": {"type": "ready"}}})),
    ];

    let result = build_timeline(&messages, None, &TimelineOptions::default());
    assert!(result.has_ready_event);
    assert_eq!(result.blocks.len(), 2);
    assert!(matches!(&result.blocks[0], ChatBlock::UserText(b) if b.text == "look into it"));

    let task = result.tool_block("task-1").unwrap();
    assert_eq!(task.state, ToolState::Completed);
    assert_eq!(task.description.as_deref(), Some("delegate"));
    assert_eq!(task.children.len(), 1);
    assert!(matches!(&task.children[0], ChatBlock::AgentText(b) if b.text == "found it"));
}

#[test]
fn test_codex_plan_renders_as_completed_todo_write() {
    let messages = vec![raw(
        "P1",
        1,
        json!({"role": "agent", "content": {"type": "codex", "data": {
            "type": "plan",
            "entries": [{"content": "Write tests", "priority": "high", "status": "pending"}]
        }}}),
    )];

    let result = build_timeline(&messages, None, &TimelineOptions::default());
    let block = result.tool_block("plan-P1").unwrap();
    assert_eq!(block.name, "TodoWrite");
    assert_eq!(block.state, ToolState::Completed);
    assert_eq!(block.input["todos"][0]["id"], "plan-1");
}

#[test]
fn test_agent_state_permissions_flow_through() {
    let state: AgentState = serde_json::from_value(json!({
        "completedRequests": {
            "t1": {"tool": "Bash", "arguments": {"command": "rm"}, "status": "denied", "reason": "Not now", "completedAt": 7}
        }
    }))
    .unwrap();
    let messages = vec![raw(
        "m1",
        1,
        assistant_blocks(
            "a1",
            json!([{"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "rm"}}]),
        ),
    )];

    let normalized = normalize_messages(&messages);
    let options = TimelineOptions::default();
    let result = reduce_chat_blocks(trace_messages(normalized, &options), Some(&state), &options);

    let block = result.tool_block("t1").unwrap();
    assert_eq!(block.state, ToolState::Error);
    assert_eq!(block.result, Some(json!({"error": "Not now"})));
    assert_eq!(block.completed_at, Some(7));
}
