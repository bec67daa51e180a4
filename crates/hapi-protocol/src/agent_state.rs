//! Session agent state as published by the CLI process.
//!
//! Only the permission bookkeeping is modelled; the reducer uses it to
//! annotate tool calls that are awaiting (or received) user approval.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blocks::{PermissionStatus, ToolPermission};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_by_user: Option<bool>,

    /// Pending permission requests by tool call id.
    #[serde(default)]
    pub requests: BTreeMap<String, PermissionRequest>,

    /// Resolved permission requests by tool call id.
    #[serde(default)]
    pub completed_requests: BTreeMap<String, CompletedRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    pub status: PermissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

/// A permission entry flattened for lookup by tool call id.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionEntry {
    pub tool_name: String,
    pub input: Value,
    pub permission: ToolPermission,
}

impl AgentState {
    /// All permission entries keyed by tool call id.
    ///
    /// A completed request supersedes a pending request with the same id.
    pub fn permissions(&self) -> BTreeMap<String, PermissionEntry> {
        let mut entries = BTreeMap::new();

        for (id, request) in &self.requests {
            entries.insert(
                id.clone(),
                PermissionEntry {
                    tool_name: request.tool.clone(),
                    input: request.arguments.clone(),
                    permission: ToolPermission {
                        id: id.clone(),
                        status: PermissionStatus::Pending,
                        reason: None,
                        mode: None,
                        allowed_tools: None,
                        decision: None,
                        created_at: request.created_at,
                        completed_at: None,
                    },
                },
            );
        }

        for (id, completed) in &self.completed_requests {
            entries.insert(
                id.clone(),
                PermissionEntry {
                    tool_name: completed.tool.clone(),
                    input: completed.arguments.clone(),
                    permission: ToolPermission {
                        id: id.clone(),
                        status: completed.status,
                        reason: completed.reason.clone(),
                        mode: completed.mode.clone(),
                        allowed_tools: completed.allowed_tools.clone(),
                        decision: completed.decision.clone(),
                        created_at: completed.created_at,
                        completed_at: completed.completed_at,
                    },
                },
            );
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_state_parsing_and_precedence() {
        let state: AgentState = serde_json::from_value(json!({
            "requests": {
                "t1": {"tool": "Bash", "arguments": {"command": "ls"}, "createdAt": 10},
                "t2": {"tool": "Edit", "arguments": {}}
            },
            "completedRequests": {
                "t2": {"tool": "Edit", "arguments": {}, "status": "denied", "reason": "nope", "completedAt": 20}
            }
        }))
        .unwrap();

        let permissions = state.permissions();
        assert_eq!(permissions.len(), 2);
        assert_eq!(permissions["t1"].permission.status, PermissionStatus::Pending);
        assert_eq!(permissions["t1"].tool_name, "Bash");
        assert_eq!(permissions["t2"].permission.status, PermissionStatus::Denied);
        assert_eq!(permissions["t2"].permission.reason.as_deref(), Some("nope"));
        assert_eq!(permissions["t2"].permission.completed_at, Some(20));
    }

    #[test]
    fn test_empty_agent_state() {
        let state: AgentState = serde_json::from_value(json!({})).unwrap();
        assert!(state.permissions().is_empty());
    }
}
