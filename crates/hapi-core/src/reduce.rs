//! TimelineReducer: traced messages to renderable chat blocks.
//!
//! The reducer is a pure fold over the whole message list. All cross-message
//! bookkeeping (permission lookups, sidechain groups, title-change dedup,
//! consumed Task groups, tool call records) lives in one [`ReducerContext`]
//! that is threaded through the fold, including the recursive folds of
//! sidechain children.
//!
//! Tool call records are keyed by id in the context, so a call and its result
//! update the same record even when they land at different nesting levels.
//! Each level only holds a slot for the record at its first position; the
//! records are written into those slots once the whole fold has finished.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, trace};

use hapi_protocol::{
    AgentContent, AgentEvent, AgentState, ChatBlock, CliOutputBlock, CliOutputSource, EventBlock,
    MessageContent, PermissionEntry, PermissionResult, PermissionStatus, ResultPermissions,
    TextBlock, ToolCallBlock, ToolCallContent, ToolPermission, ToolResultContent, ToolState,
    TracedMessage, UserContent,
};

use crate::options::TimelineOptions;

/// Name given to a block created from a result whose call was never seen.
pub const UNKNOWN_TOOL: &str = "unknown";

static CLI_OUTPUT_TAG: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"<(?:local-command-(?:stdout|stderr|caveat)|command-(?:name|message|args|contents))>")
        .ok()
});

/// Location of a block: an index into the top-level list, then into each
/// enclosing tool call's `children`.
pub type BlockPath = Vec<usize>;

/// Output of one reduction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducerResult {
    pub blocks: Vec<ChatBlock>,
    /// Every tool call block, nested ones included, by tool call id.
    pub tool_blocks_by_id: HashMap<String, BlockPath>,
    /// A `ready` event was seen anywhere in the fold.
    pub has_ready_event: bool,
}

impl ReducerResult {
    fn new(blocks: Vec<ChatBlock>, has_ready_event: bool) -> Self {
        let mut result = Self {
            blocks,
            tool_blocks_by_id: HashMap::new(),
            has_ready_event,
        };
        result.reindex();
        result
    }

    /// Look up a tool call block by id.
    pub fn tool_block(&self, id: &str) -> Option<&ToolCallBlock> {
        let (first, rest) = self.tool_blocks_by_id.get(id)?.split_first()?;
        let mut block = self.blocks.get(*first)?.as_tool_call()?;
        for index in rest {
            block = block.children.get(*index)?.as_tool_call()?;
        }
        Some(block)
    }

    fn reindex(&mut self) {
        self.tool_blocks_by_id.clear();
        index_tool_blocks(&self.blocks, &mut Vec::new(), &mut self.tool_blocks_by_id);
    }
}

fn index_tool_blocks(
    blocks: &[ChatBlock],
    prefix: &mut BlockPath,
    index: &mut HashMap<String, BlockPath>,
) {
    for (position, block) in blocks.iter().enumerate() {
        let Some(tool) = block.as_tool_call() else {
            continue;
        };
        prefix.push(position);
        index
            .entry(tool.id.clone())
            .or_insert_with(|| prefix.clone());
        index_tool_blocks(&tool.children, prefix, index);
        prefix.pop();
    }
}

// ============================================================================
// Context
// ============================================================================

/// Shared mutable state for one reduction pass.
pub struct ReducerContext<'a> {
    options: &'a TimelineOptions,
    permissions: BTreeMap<String, PermissionEntry>,
    /// Sidechain messages by the id of the message that spawned them.
    sidechains: HashMap<String, Vec<TracedMessage>>,
    sidechain_order: Vec<String>,
    consumed_sidechains: HashSet<String>,
    title_call_ids: HashSet<String>,
    /// Tool ids referenced by any call or result.
    seen_tool_ids: HashSet<String>,
    /// Live tool call records, one per id.
    tool_blocks: HashMap<String, ToolCallBlock>,
    /// Reduced sidechain children by Task call id.
    tool_children: HashMap<String, Vec<ChatBlock>>,
}

impl<'a> ReducerContext<'a> {
    pub fn new(options: &'a TimelineOptions, agent_state: Option<&AgentState>) -> Self {
        Self {
            options,
            permissions: agent_state.map(AgentState::permissions).unwrap_or_default(),
            sidechains: HashMap::new(),
            sidechain_order: Vec::new(),
            consumed_sidechains: HashSet::new(),
            title_call_ids: HashSet::new(),
            seen_tool_ids: HashSet::new(),
            tool_blocks: HashMap::new(),
            tool_children: HashMap::new(),
        }
    }

    /// The record for `id`, creating it and claiming a slot in `slots` if new.
    fn tool_block(
        &mut self,
        slots: &mut Vec<ChatBlock>,
        id: &str,
        name: &str,
        message: &TracedMessage,
    ) -> &mut ToolCallBlock {
        self.tool_blocks.entry(id.to_string()).or_insert_with(|| {
            slots.push(ChatBlock::ToolCall(ToolCallBlock::new(id, name, message.created_at)));
            let mut block = ToolCallBlock::new(id, name, message.created_at);
            block.local_id = message.local_id.clone();
            block
        })
    }

    /// Move sidechain messages into their groups and return the top-level ones.
    pub fn split_sidechains(&mut self, traced: Vec<TracedMessage>) -> Vec<TracedMessage> {
        let mut root = Vec::with_capacity(traced.len());
        for message in traced {
            match message.sidechain_id.clone() {
                Some(sidechain_id) => {
                    if !self.sidechains.contains_key(&sidechain_id) {
                        self.sidechain_order.push(sidechain_id.clone());
                    }
                    self.sidechains
                        .entry(sidechain_id)
                        .or_default()
                        .push(message);
                }
                None => root.push(message),
            }
        }
        root
    }

    /// Permission entries whose tool id no message mentioned.
    fn unseen_permissions(&self) -> impl Iterator<Item = (&String, &PermissionEntry)> {
        self.permissions
            .iter()
            .filter(|(id, _)| !self.seen_tool_ids.contains(*id))
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Reduce a full traced transcript.
///
/// Sidechain messages are attached under the Task call that spawned them.
/// Permissions from `agent_state` annotate matching tool calls; permissions
/// for tools no message mentions become standalone tool cards.
pub fn reduce_chat_blocks(
    traced: Vec<TracedMessage>,
    agent_state: Option<&AgentState>,
    options: &TimelineOptions,
) -> ReducerResult {
    let mut ctx = ReducerContext::new(options, agent_state);
    let root = ctx.split_sidechains(traced);

    let (slots, mut has_ready_event) = reduce_level(&root, &mut ctx);

    // Groups whose Task call was never reduced still render, flattened.
    let mut orphaned = Vec::new();
    for sidechain_id in std::mem::take(&mut ctx.sidechain_order) {
        let Some(group) = ctx.sidechains.remove(&sidechain_id) else {
            continue;
        };
        debug!(sidechain_id = %sidechain_id, messages = group.len(), "sidechain without a reduced Task call");
        let (group_slots, ready) = reduce_level(&group, &mut ctx);
        orphaned.push(group_slots);
        has_ready_event |= ready;
    }

    let mut blocks = materialize(slots, &mut ctx);
    for group_slots in orphaned {
        blocks.extend(materialize(group_slots, &mut ctx));
    }

    let mut cards: Vec<ToolCallBlock> = ctx
        .unseen_permissions()
        .map(|(id, entry)| permission_card(id, entry))
        .collect();
    cards.sort_by_key(|card| card.created_at);
    blocks.extend(cards.into_iter().map(ChatBlock::ToolCall));

    ReducerResult::new(blocks, has_ready_event)
}

/// Reduce one message sequence with a caller-owned context.
///
/// Tool call records created here are moved out of `ctx` into the result.
pub fn reduce_timeline(messages: &[TracedMessage], ctx: &mut ReducerContext<'_>) -> ReducerResult {
    let (slots, has_ready_event) = reduce_level(messages, ctx);
    let blocks = materialize(slots, ctx);
    ReducerResult::new(blocks, has_ready_event)
}

fn reduce_level(messages: &[TracedMessage], ctx: &mut ReducerContext<'_>) -> (Vec<ChatBlock>, bool) {
    let mut level = Level::default();
    for message in messages {
        level.push_message(message, ctx);
    }
    (level.blocks, level.has_ready_event)
}

/// Write tool call records into their slots, recursing into Task children,
/// then run the post-passes on each level.
fn materialize(slots: Vec<ChatBlock>, ctx: &mut ReducerContext<'_>) -> Vec<ChatBlock> {
    let mut blocks = Vec::with_capacity(slots.len());
    for slot in slots {
        let ChatBlock::ToolCall(placeholder) = slot else {
            blocks.push(slot);
            continue;
        };
        let Some(mut block) = ctx.tool_blocks.remove(&placeholder.id) else {
            continue;
        };
        if let Some(children) = ctx.tool_children.remove(&block.id) {
            block.children = materialize(children, ctx);
        }
        blocks.push(ChatBlock::ToolCall(block));
    }

    merge_cli_output(&mut blocks);
    collapse_duplicate_events(&mut blocks);
    drop_title_echoes(&mut blocks);
    blocks
}

// ============================================================================
// Per-level fold
// ============================================================================

#[derive(Default)]
struct Level {
    /// Tool calls are slots here; their records live in the context.
    blocks: Vec<ChatBlock>,
    has_ready_event: bool,
}

impl Level {
    fn push_message(&mut self, message: &TracedMessage, ctx: &mut ReducerContext<'_>) {
        match &message.content {
            MessageContent::User(UserContent { text }) => {
                let block = text_block(message.id.clone(), message, text.clone());
                self.blocks.push(
                    match cli_output(&block, message.meta.as_ref(), CliOutputSource::User, ctx.options) {
                        Some(cli) => ChatBlock::CliOutput(cli),
                        None => ChatBlock::UserText(block),
                    },
                );
            }
            MessageContent::Event(event) if event.is_ready() => {
                self.has_ready_event = true;
            }
            MessageContent::Event(event) => {
                self.blocks.push(ChatBlock::AgentEvent(EventBlock {
                    id: message.id.clone(),
                    created_at: message.created_at,
                    event: event.clone(),
                    meta: message.meta.clone(),
                }));
            }
            MessageContent::Agent(contents) => {
                for (index, content) in contents.iter().enumerate() {
                    let id = format!("{}:{index}", message.id);
                    self.push_agent_content(id, message, content, ctx);
                }
            }
        }
    }

    fn push_agent_content(
        &mut self,
        id: String,
        message: &TracedMessage,
        content: &AgentContent,
        ctx: &mut ReducerContext<'_>,
    ) {
        match content {
            AgentContent::Text { text } => {
                let block = text_block(id, message, text.clone());
                self.blocks.push(
                    match cli_output(&block, message.meta.as_ref(), CliOutputSource::Assistant, ctx.options) {
                        Some(cli) => ChatBlock::CliOutput(cli),
                        None => ChatBlock::AgentText(block),
                    },
                );
            }
            AgentContent::Reasoning { text } => {
                self.blocks
                    .push(ChatBlock::AgentReasoning(text_block(id, message, text.clone())));
            }
            AgentContent::ToolCall(call) if ctx.options.is_title_tool(&call.name) => {
                ctx.seen_tool_ids.insert(call.id.clone());
                if !ctx.title_call_ids.insert(call.id.clone()) {
                    trace!(tool_id = %call.id, "suppressing repeated title change");
                    return;
                }
                let title = call
                    .input
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.blocks.push(ChatBlock::AgentEvent(EventBlock {
                    id,
                    created_at: message.created_at,
                    event: AgentEvent::TitleChanged { title }.into(),
                    meta: None,
                }));
            }
            AgentContent::ToolCall(call) => self.push_tool_call(message, call, ctx),
            AgentContent::ToolResult(result) => self.push_tool_result(message, result, ctx),
            AgentContent::Image { source } => {
                let mut block = text_block(id, message, "[image]".to_string());
                block.meta = Some(json!({ "image": source }));
                self.blocks.push(ChatBlock::AgentText(block));
            }
            AgentContent::Summary { summary } => {
                self.blocks
                    .push(ChatBlock::AgentText(text_block(id, message, summary.clone())));
            }
            // The Task call already shows the prompt.
            AgentContent::Sidechain { .. } if message.sidechain_id.is_some() => {}
            AgentContent::Sidechain { prompt } => {
                self.blocks
                    .push(ChatBlock::UserText(text_block(id, message, prompt.clone())));
            }
        }
    }

    fn push_tool_call(
        &mut self,
        message: &TracedMessage,
        call: &ToolCallContent,
        ctx: &mut ReducerContext<'_>,
    ) {
        ctx.seen_tool_ids.insert(call.id.clone());
        let permission = ctx
            .permissions
            .get(&call.id)
            .map(|entry| entry.permission.clone());

        let children = if ctx.options.is_task_tool(&call.name) {
            self.sidechain_children(&message.id, ctx)
        } else {
            None
        };

        let block = ctx.tool_block(&mut self.blocks, &call.id, &call.name, message);
        if block.name == UNKNOWN_TOOL {
            block.name = call.name.clone();
        }
        block.input = call.input.clone();
        if call.description.is_some() {
            block.description = call.description.clone();
        }
        block.started_at.get_or_insert(message.created_at);
        if block.permission.is_none() {
            block.permission = permission;
        }
        if !block.state.is_terminal() {
            apply_permission_state(block);
        }
        if let Some(children) = children {
            ctx.tool_children.insert(call.id.clone(), children);
        }
    }

    /// Reduce the sidechain spawned by `message_id`, at most once per pass.
    fn sidechain_children(
        &mut self,
        message_id: &str,
        ctx: &mut ReducerContext<'_>,
    ) -> Option<Vec<ChatBlock>> {
        if !ctx.consumed_sidechains.insert(message_id.to_string()) {
            return None;
        }
        let group = ctx.sidechains.remove(message_id)?;
        let (children, has_ready_event) = reduce_level(&group, ctx);
        self.has_ready_event |= has_ready_event;
        Some(children)
    }

    fn push_tool_result(
        &mut self,
        message: &TracedMessage,
        result: &ToolResultContent,
        ctx: &mut ReducerContext<'_>,
    ) {
        if ctx.title_call_ids.contains(&result.tool_use_id) {
            return;
        }
        ctx.seen_tool_ids.insert(result.tool_use_id.clone());

        let entry = ctx.permissions.get(&result.tool_use_id).cloned();
        let is_stub = !ctx.tool_blocks.contains_key(&result.tool_use_id);
        let name = entry
            .as_ref()
            .map_or(UNKNOWN_TOOL, |entry| entry.tool_name.as_str());

        let block = ctx.tool_block(&mut self.blocks, &result.tool_use_id, name, message);
        if is_stub {
            trace!(tool_id = %result.tool_use_id, "result without a call, creating stub");
            if let Some(entry) = entry {
                block.input = entry.input;
                block.permission = Some(entry.permission);
            }
        }

        block.state = if result.is_error {
            ToolState::Error
        } else {
            ToolState::Completed
        };
        block.result = Some(result.content.clone());
        block.completed_at = Some(message.created_at);

        if let Some(annotation) = &result.permissions {
            let merged = merge_result_permission(block.permission.take(), annotation, &result.tool_use_id);
            block.permission = Some(merged);
        }
    }
}

fn text_block(id: String, message: &TracedMessage, text: String) -> TextBlock {
    TextBlock {
        id,
        local_id: message.local_id.clone(),
        created_at: message.created_at,
        text,
        meta: message.meta.clone(),
    }
}

/// Convert a text block to CLI output when its content or metadata says so.
fn cli_output(
    block: &TextBlock,
    meta: Option<&Value>,
    source: CliOutputSource,
    options: &TimelineOptions,
) -> Option<CliOutputBlock> {
    let kind_matches = meta
        .and_then(|meta| meta.get("kind"))
        .and_then(Value::as_str)
        .is_some_and(|kind| kind == options.cli_output_meta_kind);
    let tag_matches = CLI_OUTPUT_TAG
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(&block.text));
    if !kind_matches && !tag_matches {
        return None;
    }

    Some(CliOutputBlock {
        id: block.id.clone(),
        local_id: block.local_id.clone(),
        created_at: block.created_at,
        text: block.text.clone(),
        source,
        meta: block.meta.clone(),
    })
}

// ============================================================================
// Permissions
// ============================================================================

fn denial_result(permission: &ToolPermission) -> Value {
    json!({ "error": permission.reason.as_deref().unwrap_or("Permission denied") })
}

/// Derive a non-terminal call's state from its permission.
fn apply_permission_state(block: &mut ToolCallBlock) {
    let Some(permission) = &block.permission else {
        block.state = ToolState::Running;
        return;
    };
    match permission.status {
        PermissionStatus::Pending => block.state = ToolState::Pending,
        PermissionStatus::Approved => block.state = ToolState::Running,
        PermissionStatus::Denied | PermissionStatus::Canceled => {
            block.result = Some(denial_result(permission));
            block.completed_at = permission.completed_at;
            block.state = ToolState::Error;
        }
    }
}

/// Overlay a result's permission annotation onto the call-side permission.
fn merge_result_permission(
    call_side: Option<ToolPermission>,
    annotation: &ResultPermissions,
    tool_id: &str,
) -> ToolPermission {
    let status = match annotation.result {
        PermissionResult::Approved => PermissionStatus::Approved,
        PermissionResult::Denied => PermissionStatus::Denied,
    };
    let call_side = call_side.unwrap_or_else(|| ToolPermission {
        id: tool_id.to_string(),
        status,
        reason: None,
        mode: None,
        allowed_tools: None,
        decision: None,
        created_at: None,
        completed_at: None,
    });

    ToolPermission {
        id: call_side.id,
        status,
        reason: call_side.reason,
        mode: annotation.mode.clone().or(call_side.mode),
        allowed_tools: annotation.allowed_tools.clone().or(call_side.allowed_tools),
        decision: annotation.decision.clone().or(call_side.decision),
        created_at: call_side.created_at,
        completed_at: Some(annotation.date),
    }
}

/// Tool card for a permission request no message has mentioned yet.
fn permission_card(id: &str, entry: &PermissionEntry) -> ToolCallBlock {
    let permission = &entry.permission;
    let mut block = ToolCallBlock::new(
        id,
        entry.tool_name.as_str(),
        permission.created_at.unwrap_or_default(),
    );
    block.input = entry.input.clone();

    match permission.status {
        PermissionStatus::Pending => block.state = ToolState::Pending,
        PermissionStatus::Approved => {
            block.state = ToolState::Completed;
            block.result = Some(Value::String("Approved".to_string()));
            block.completed_at = permission.completed_at;
        }
        PermissionStatus::Denied | PermissionStatus::Canceled => {
            block.state = ToolState::Error;
            block.result = Some(denial_result(permission));
            block.completed_at = permission.completed_at;
        }
    }
    block.permission = Some(permission.clone());
    block
}

// ============================================================================
// Post-passes
// ============================================================================

/// Join adjacent CLI output from the same source into one block.
fn merge_cli_output(blocks: &mut Vec<ChatBlock>) {
    let mut merged: Vec<ChatBlock> = Vec::with_capacity(blocks.len());
    for block in blocks.drain(..) {
        if let (Some(ChatBlock::CliOutput(previous)), ChatBlock::CliOutput(next)) =
            (merged.last_mut(), &block)
            && previous.source == next.source
        {
            previous.text.push('\n');
            previous.text.push_str(&next.text);
            continue;
        }
        merged.push(block);
    }
    *blocks = merged;
}

/// Collapse runs of identical events.
fn collapse_duplicate_events(blocks: &mut Vec<ChatBlock>) {
    blocks.dedup_by(|next, previous| match (previous, next) {
        (ChatBlock::AgentEvent(previous), ChatBlock::AgentEvent(next)) => {
            previous.event == next.event
        }
        _ => false,
    });
}

/// Drop a status message that merely repeats the preceding title change.
fn drop_title_echoes(blocks: &mut Vec<ChatBlock>) {
    let mut kept: Vec<ChatBlock> = Vec::with_capacity(blocks.len());
    for block in blocks.drain(..) {
        let previous = kept.last().and_then(ChatBlock::as_event).and_then(|e| e.event.as_agent());
        let current = block.as_event().and_then(|e| e.event.as_agent());
        let is_echo = match (previous, current) {
            (Some(title @ AgentEvent::TitleChanged { .. }), Some(AgentEvent::Message { message })) => {
                title.display_text().as_deref() == Some(message.as_str())
            }
            _ => false,
        };
        if is_echo {
            trace!(id = block.id(), "dropping title change echo");
            continue;
        }
        kept.push(block);
    }
    *blocks = kept;
}
