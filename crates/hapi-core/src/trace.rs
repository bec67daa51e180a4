//! SidechainTracer: rebuilds delegated sub-agent streams.
//!
//! Sub-agent records arrive flat, linked only by `parentUuid`. The root of a
//! sidechain repeats the prompt of the Task call that spawned it; every later
//! record points at its predecessor. Records may arrive before their parent,
//! so unresolved ones are buffered until their lineage is known.

use std::collections::HashMap;

use tracing::{debug, trace};

use hapi_protocol::{AgentContent, NormalizedMessage, TracedMessage};

use crate::options::TimelineOptions;

/// Tag every sidechain message with the id of the message whose Task call
/// spawned it.
///
/// Top-level messages are emitted in input order. A sidechain message is
/// emitted once its lineage resolves, followed by its buffered descendants.
/// Messages whose lineage never resolves are appended at the end, untagged,
/// in arrival order.
pub fn trace_messages(
    messages: Vec<NormalizedMessage>,
    options: &TimelineOptions,
) -> Vec<TracedMessage> {
    let task_prompts = index_task_prompts(&messages, options);
    let mut tracer = Tracer {
        task_prompts,
        sidechain_by_uuid: HashMap::new(),
        orphans: HashMap::new(),
        traced: Vec::with_capacity(messages.len()),
    };

    for (arrival, message) in messages.into_iter().enumerate() {
        tracer.visit(arrival, message);
    }
    tracer.finish()
}

/// Task prompt text to the id of the message that issued it. First wins.
fn index_task_prompts(
    messages: &[NormalizedMessage],
    options: &TimelineOptions,
) -> HashMap<String, String> {
    let mut prompts = HashMap::new();
    for message in messages {
        for content in message.agent_content() {
            let AgentContent::ToolCall(call) = content else {
                continue;
            };
            if !options.is_task_tool(&call.name) {
                continue;
            }
            if let Some(prompt) = call.prompt() {
                prompts
                    .entry(prompt.to_string())
                    .or_insert_with(|| message.id.clone());
            }
        }
    }
    prompts
}

struct Tracer {
    task_prompts: HashMap<String, String>,
    sidechain_by_uuid: HashMap<String, String>,
    /// Buffered messages keyed by the parent uuid they wait for.
    orphans: HashMap<String, Vec<(usize, NormalizedMessage)>>,
    traced: Vec<TracedMessage>,
}

impl Tracer {
    fn visit(&mut self, arrival: usize, message: NormalizedMessage) {
        if !message.is_sidechain {
            self.traced.push(TracedMessage::top_level(message));
            return;
        }

        let by_prompt = message
            .sidechain_prompt()
            .and_then(|prompt| self.task_prompts.get(prompt));
        let by_parent = || {
            message
                .parent_uuid
                .as_ref()
                .and_then(|parent| self.sidechain_by_uuid.get(parent))
        };

        if let Some(sidechain_id) = by_prompt.or_else(by_parent).cloned() {
            self.resolve(message, sidechain_id);
            return;
        }

        match message.parent_uuid.clone() {
            Some(parent) => {
                trace!(id = %message.id, parent = %parent, "buffering sidechain orphan");
                self.orphans
                    .entry(parent)
                    .or_default()
                    .push((arrival, message));
            }
            None => {
                debug!(id = %message.id, "sidechain message without lineage");
                self.traced.push(TracedMessage::top_level(message));
            }
        }
    }

    /// Tag `message` and, depth first, every buffered descendant.
    fn resolve(&mut self, message: NormalizedMessage, sidechain_id: String) {
        let mut pending = vec![message];

        while let Some(message) = pending.pop() {
            if let Some(uuid) = &message.uuid {
                self.sidechain_by_uuid
                    .insert(uuid.clone(), sidechain_id.clone());
                if let Some(children) = self.orphans.remove(uuid) {
                    pending.extend(children.into_iter().rev().map(|(_, child)| child));
                }
            }
            self.traced
                .push(TracedMessage::in_sidechain(message, sidechain_id.clone()));
        }
    }

    fn finish(mut self) -> Vec<TracedMessage> {
        let mut unresolved: Vec<(usize, NormalizedMessage)> =
            self.orphans.into_values().flatten().collect();
        if !unresolved.is_empty() {
            debug!(count = unresolved.len(), "sidechain lineage never resolved");
        }
        unresolved.sort_by_key(|(arrival, _)| *arrival);

        self.traced.extend(
            unresolved
                .into_iter()
                .map(|(_, message)| TracedMessage::top_level(message)),
        );
        self.traced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hapi_protocol::{MessageContent, ToolCallContent, UserContent};
    use serde_json::json;

    fn message(id: &str, content: Vec<AgentContent>) -> NormalizedMessage {
        NormalizedMessage {
            id: id.to_string(),
            local_id: None,
            created_at: 0,
            content: MessageContent::Agent(content),
            is_sidechain: false,
            uuid: None,
            parent_uuid: None,
            usage: None,
            meta: None,
        }
    }

    fn task(id: &str, prompt: &str) -> NormalizedMessage {
        message(
            id,
            vec![AgentContent::ToolCall(ToolCallContent {
                id: format!("call-{id}"),
                name: "Task".to_string(),
                input: json!({"prompt": prompt}),
                description: None,
            })],
        )
    }

    fn sidechain(id: &str, uuid: &str, parent: Option<&str>, prompt: Option<&str>) -> NormalizedMessage {
        let content = match prompt {
            Some(prompt) => vec![AgentContent::Sidechain {
                prompt: prompt.to_string(),
            }],
            None => vec![AgentContent::Text {
                text: format!("work {id}"),
            }],
        };
        let mut msg = message(id, content);
        msg.is_sidechain = true;
        msg.uuid = Some(uuid.to_string());
        msg.parent_uuid = parent.map(String::from);
        msg
    }

    fn sidechain_of<'a>(traced: &'a [TracedMessage], id: &str) -> Option<&'a str> {
        traced
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.sidechain_id.as_deref())
    }

    #[test]
    fn test_in_order_chain() {
        let traced = trace_messages(
            vec![
                task("T1", "X"),
                sidechain("S1", "u1", None, Some("X")),
                sidechain("S2", "u2", Some("u1"), None),
                sidechain("S3", "u3", Some("u2"), None),
            ],
            &TimelineOptions::default(),
        );

        assert_eq!(traced.len(), 4);
        for id in ["S1", "S2", "S3"] {
            assert_eq!(sidechain_of(&traced, id), Some("T1"));
        }
        assert_eq!(sidechain_of(&traced, "T1"), None);
    }

    #[test]
    fn test_child_before_root() {
        let traced = trace_messages(
            vec![
                task("T1", "X"),
                sidechain("S2", "u2", Some("u1"), None),
                sidechain("S3", "u3", Some("u2"), None),
                sidechain("S1", "u1", None, Some("X")),
            ],
            &TimelineOptions::default(),
        );

        let order: Vec<&str> = traced.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["T1", "S1", "S2", "S3"]);
        assert!(traced[1..].iter().all(|m| m.sidechain_id.as_deref() == Some("T1")));
    }

    #[test]
    fn test_unresolved_lineage_is_kept_top_level() {
        let mut user = message("U1", Vec::new());
        user.content = MessageContent::User(UserContent {
            text: "hi".to_string(),
        });

        let traced = trace_messages(
            vec![
                sidechain("S9", "u9", Some("missing"), None),
                user,
                sidechain("S8", "u8", Some("missing"), None),
            ],
            &TimelineOptions::default(),
        );

        let order: Vec<&str> = traced.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, ["U1", "S9", "S8"]);
        assert!(traced.iter().all(|m| m.sidechain_id.is_none()));
    }

    #[test]
    fn test_first_task_wins_duplicate_prompt() {
        let traced = trace_messages(
            vec![
                task("T1", "same"),
                task("T2", "same"),
                sidechain("S1", "u1", None, Some("same")),
            ],
            &TimelineOptions::default(),
        );
        assert_eq!(sidechain_of(&traced, "S1"), Some("T1"));
    }

    #[test]
    fn test_unmatched_root_without_parent() {
        let traced = trace_messages(
            vec![sidechain("S1", "u1", None, Some("nobody asked"))],
            &TimelineOptions::default(),
        );
        assert_eq!(traced.len(), 1);
        assert!(traced[0].sidechain_id.is_none());
    }
}
