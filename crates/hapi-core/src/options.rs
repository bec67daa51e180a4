//! Tunables shared by the tracer and the reducer.

use serde::{Deserialize, Serialize};

/// Names the pipeline treats specially.
///
/// Loaded from the `[timeline]` config section; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineOptions {
    /// Tool whose calls spawn sidechains.
    pub task_tool_name: String,

    /// Tools whose calls rename the session.
    pub title_tool_names: Vec<String>,

    /// `meta.kind` value marking a message as CLI output.
    pub cli_output_meta_kind: String,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            task_tool_name: "Task".to_string(),
            title_tool_names: vec![
                "mcp__hapi__change_title".to_string(),
                "change_title".to_string(),
            ],
            cli_output_meta_kind: "cli-output".to_string(),
        }
    }
}

impl TimelineOptions {
    pub fn is_task_tool(&self, name: &str) -> bool {
        name == self.task_tool_name
    }

    pub fn is_title_tool(&self, name: &str) -> bool {
        self.title_tool_names.iter().any(|tool| tool == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_options_fill_defaults() {
        let options: TimelineOptions =
            serde_json::from_str(r#"{"task_tool_name": "Agent"}"#).unwrap();
        assert!(options.is_task_tool("Agent"));
        assert!(!options.is_task_tool("Task"));
        assert!(options.is_title_tool("change_title"));
        assert_eq!(options.cli_output_meta_kind, "cli-output");
    }
}
