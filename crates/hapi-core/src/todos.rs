//! Todo list extraction.
//!
//! Agents publish their working plan in several shapes: a Claude `TodoWrite`
//! tool call, the same call emitted by the Codex backend, or a Codex `plan`
//! record (ACP `entries` or step-style `plan`). All of them validate down to
//! one [`TodoItem`] list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hapi_protocol::{AgentRecordContent, CodexRecord, PlanRecord, RoleWrappedRecord};

/// Tool name that carries a todo list.
pub const TODO_WRITE_TOOL: &str = "TodoWrite";

/// One validated todo entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub priority: String,
    pub status: String,
    pub id: String,
}

fn valid_priority(value: &str) -> bool {
    matches!(value, "high" | "medium" | "low")
}

fn valid_status(value: &str) -> bool {
    matches!(value, "pending" | "in_progress" | "completed")
}

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Build a todo from an entry with `content`, `priority`, `status` and an
/// optional `id`. `default_id` receives the content when the id is missing.
fn todo_from_entry(item: &Value, default_id: impl FnOnce(&str) -> String) -> Option<TodoItem> {
    let content = str_field(item, "content");
    let priority = str_field(item, "priority");
    let status = str_field(item, "status");
    if content.is_empty() || !valid_priority(priority) || !valid_status(status) {
        return None;
    }
    let id = match str_field(item, "id") {
        "" => default_id(content),
        id => id.to_string(),
    };
    Some(TodoItem {
        content: content.to_string(),
        priority: priority.to_string(),
        status: status.to_string(),
        id,
    })
}

/// Validate a `TodoWrite` input's `todos` array.
///
/// Entries missing content or carrying an unknown priority/status are
/// dropped. A missing id is derived from the content.
pub fn validate_todos(candidate: &Value) -> Option<Vec<TodoItem>> {
    let todos: Vec<TodoItem> = candidate
        .as_array()?
        .iter()
        .filter_map(|item| todo_from_entry(item, |content| content.replace(' ', "-")))
        .collect();

    (!todos.is_empty()).then_some(todos)
}

/// Step-style plans spell the running state several ways.
fn step_status(value: &str) -> Option<&'static str> {
    match value {
        "pending" => Some("pending"),
        "in_progress" | "in-progress" | "inProgress" => Some("in_progress"),
        "completed" => Some("completed"),
        _ => None,
    }
}

/// Todos carried by a backend plan record.
pub fn plan_todos(plan: &PlanRecord) -> Option<Vec<TodoItem>> {
    if let Some(entries) = &plan.entries {
        let todos: Vec<TodoItem> = entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| todo_from_entry(entry, |_| format!("plan-{}", index + 1)))
            .collect();
        if !todos.is_empty() {
            return Some(todos);
        }
    }

    let steps = plan.plan.as_ref()?;
    let todos: Vec<TodoItem> = steps
        .iter()
        .enumerate()
        .filter_map(|(index, step)| {
            let content = str_field(step, "step");
            let status = step_status(str_field(step, "status"))?;
            if content.is_empty() {
                return None;
            }
            Some(TodoItem {
                content: content.to_string(),
                priority: "medium".to_string(),
                status: status.to_string(),
                id: format!("plan-{}", index + 1),
            })
        })
        .collect();

    (!todos.is_empty()).then_some(todos)
}

/// The todo list a raw message content carries, if any.
///
/// Only agent records are inspected.
pub fn extract_todos(content: &Value) -> Option<Vec<TodoItem>> {
    let record = RoleWrappedRecord::unwrap_envelope(content)?;
    if record.role != "agent" && record.role != "assistant" {
        return None;
    }

    match record.content.get("type").and_then(Value::as_str)? {
        "output" => todos_from_output(&record.content),
        "codex" => match serde_json::from_value::<AgentRecordContent>(record.content.clone()).ok()? {
            AgentRecordContent::Codex(CodexRecord::ToolCall { name, input, .. })
                if name == TODO_WRITE_TOOL =>
            {
                validate_todos(input.get("todos")?)
            }
            AgentRecordContent::Codex(CodexRecord::Plan(plan)) => plan_todos(&plan),
            _ => None,
        },
        _ => None,
    }
}

fn todos_from_output(content: &Value) -> Option<Vec<TodoItem>> {
    let data = content.get("data")?;
    if data.get("type").and_then(Value::as_str) != Some("assistant") {
        return None;
    }

    data.get("message")?
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter(|block| block.get("name").and_then(Value::as_str) == Some(TODO_WRITE_TOOL))
        .find_map(|block| validate_todos(block.get("input")?.get("todos")?))
}
