//! BlockReconciler: keeps block identity stable across reduction passes.
//!
//! The reducer rebuilds every block on each pass. Renderers that key on
//! object identity would then redraw everything, so reconciliation maps the
//! fresh blocks onto the previous pass: unchanged blocks keep their `Rc`,
//! and tool call blocks are long-lived handles updated in place.
//!
//! Reconciliation runs on the rendering thread, so handles are `Rc` based and
//! not `Send`.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use hapi_protocol::{ChatBlock, ToolCallBlock};

/// Retained `id -> block` map fed into the next [`reconcile`] call.
pub type BlockIndex = HashMap<String, RenderBlock>;

/// A block with stable identity.
#[derive(Debug, Clone)]
pub enum RenderBlock {
    /// Immutable block; replaced wholesale when its value changes.
    Static(Rc<ChatBlock>),
    /// Tool call; the same handle lives as long as the tool id does.
    Tool(Rc<ToolCallHandle>),
}

impl RenderBlock {
    pub fn id(&self) -> String {
        match self {
            Self::Static(block) => block.id().to_string(),
            Self::Tool(handle) => handle.view().tool.id.clone(),
        }
    }

    /// Whether both refer to the same underlying object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Static(a), Self::Static(b)) => Rc::ptr_eq(a, b),
            (Self::Tool(a), Self::Tool(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Materialize back into a plain block tree.
    pub fn to_chat_block(&self) -> ChatBlock {
        match self {
            Self::Static(block) => block.as_ref().clone(),
            Self::Tool(handle) => {
                let view = handle.view();
                let mut tool = view.tool.clone();
                tool.children = view.children.iter().map(Self::to_chat_block).collect();
                ChatBlock::ToolCall(tool)
            }
        }
    }
}

/// Current contents of a tool call handle.
#[derive(Debug, Clone)]
pub struct ToolCallView {
    /// Tool fields; `children` is always empty here.
    pub tool: ToolCallBlock,
    pub children: Vec<RenderBlock>,
}

/// Shared, in-place-updated tool call.
#[derive(Debug)]
pub struct ToolCallHandle {
    view: RefCell<ToolCallView>,
    revision: Cell<u64>,
}

impl ToolCallHandle {
    fn new(tool: ToolCallBlock, children: Vec<RenderBlock>) -> Self {
        Self {
            view: RefCell::new(ToolCallView { tool, children }),
            revision: Cell::new(0),
        }
    }

    pub fn view(&self) -> Ref<'_, ToolCallView> {
        self.view.borrow()
    }

    /// Incremented on every in-place change.
    pub fn revision(&self) -> u64 {
        self.revision.get()
    }

    /// Replace the contents; returns whether anything changed.
    fn update(&self, tool: ToolCallBlock, children: Vec<RenderBlock>, children_changed: bool) -> bool {
        let mut view = self.view.borrow_mut();
        let same_children = view.children.len() == children.len()
            && view
                .children
                .iter()
                .zip(&children)
                .all(|(old, new)| old.ptr_eq(new));
        if view.tool == tool && same_children && !children_changed {
            return false;
        }

        view.tool = tool;
        view.children = children;
        self.revision.set(self.revision.get() + 1);
        true
    }
}

/// Output of [`reconcile`].
#[derive(Debug, Default)]
pub struct Reconciled {
    pub blocks: Vec<RenderBlock>,
    /// Every block, nested ones included, by id.
    pub by_id: BlockIndex,
}

/// Map freshly reduced blocks onto the previous pass.
pub fn reconcile(blocks: &[ChatBlock], previous: &BlockIndex) -> Reconciled {
    let mut by_id = BlockIndex::with_capacity(previous.len().max(blocks.len()));
    let (blocks, _) = reconcile_list(blocks, previous, &mut by_id);
    Reconciled { blocks, by_id }
}

fn reconcile_list(
    blocks: &[ChatBlock],
    previous: &BlockIndex,
    by_id: &mut BlockIndex,
) -> (Vec<RenderBlock>, bool) {
    let mut changed = false;
    let reconciled = blocks
        .iter()
        .map(|block| {
            let (render, block_changed) = reconcile_block(block, previous, by_id);
            changed |= block_changed;
            render
        })
        .collect();
    (reconciled, changed)
}

fn reconcile_block(
    block: &ChatBlock,
    previous: &BlockIndex,
    by_id: &mut BlockIndex,
) -> (RenderBlock, bool) {
    let (render, changed) = match block {
        ChatBlock::ToolCall(tool) => {
            let (children, children_changed) = reconcile_list(&tool.children, previous, by_id);
            let mut fields = tool.clone();
            fields.children.clear();

            match previous.get(&tool.id) {
                Some(RenderBlock::Tool(handle)) => {
                    let changed = handle.update(fields, children, children_changed);
                    (RenderBlock::Tool(Rc::clone(handle)), changed)
                }
                _ => (
                    RenderBlock::Tool(Rc::new(ToolCallHandle::new(fields, children))),
                    true,
                ),
            }
        }
        _ => match previous.get(block.id()) {
            Some(RenderBlock::Static(prior)) if prior.as_ref() == block => {
                (RenderBlock::Static(Rc::clone(prior)), false)
            }
            _ => (RenderBlock::Static(Rc::new(block.clone())), true),
        },
    };

    by_id.insert(block.id().to_string(), render.clone());
    (render, changed)
}
