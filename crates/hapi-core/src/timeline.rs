//! End-to-end pipeline: raw hub messages to reconciled blocks.

use hapi_protocol::{AgentState, RawMessage};
use tracing::debug;

use crate::normalize::normalize_messages;
use crate::options::TimelineOptions;
use crate::reconcile::{BlockIndex, RenderBlock, reconcile};
use crate::reduce::{ReducerResult, reduce_chat_blocks};
use crate::trace::trace_messages;

/// Normalize, trace and reduce a transcript in one call.
pub fn build_timeline(
    raw: &[RawMessage],
    agent_state: Option<&AgentState>,
    options: &TimelineOptions,
) -> ReducerResult {
    let normalized = normalize_messages(raw);
    let traced = trace_messages(normalized, options);
    reduce_chat_blocks(traced, agent_state, options)
}

/// A session timeline that is re-folded on every update.
///
/// Keeps the reconciler's index between passes so unchanged blocks keep
/// their identity.
#[derive(Debug, Default)]
pub struct Timeline {
    options: TimelineOptions,
    index: BlockIndex,
    blocks: Vec<RenderBlock>,
    has_ready_event: bool,
}

impl Timeline {
    pub fn new(options: TimelineOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Rebuild from the full message list.
    pub fn update(&mut self, raw: &[RawMessage], agent_state: Option<&AgentState>) -> &[RenderBlock] {
        let reduced = build_timeline(raw, agent_state, &self.options);
        let reconciled = reconcile(&reduced.blocks, &self.index);
        debug!(
            messages = raw.len(),
            blocks = reconciled.blocks.len(),
            "timeline updated"
        );

        self.index = reconciled.by_id;
        self.blocks = reconciled.blocks;
        self.has_ready_event = reduced.has_ready_event;
        &self.blocks
    }

    pub fn blocks(&self) -> &[RenderBlock] {
        &self.blocks
    }

    pub fn has_ready_event(&self) -> bool {
        self.has_ready_event
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn options(&self) -> &TimelineOptions {
        &self.options
    }
}
