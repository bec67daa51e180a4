//! Core of the HAPI remote-agent bridge.
//!
//! Outbound, [`ModeAwareQueue`] groups instructions into agent turns without
//! mixing incompatible modes. Inbound, agent output flows through
//! [`normalize_message`], [`trace_messages`] and [`reduce_chat_blocks`] to
//! produce renderable blocks, and [`reconcile`] keeps their identity stable
//! across passes.

pub mod error;
pub mod mode;
pub mod normalize;
pub mod options;
pub mod queue;
pub mod reconcile;
pub mod reduce;
pub mod timeline;
pub mod todos;
pub mod trace;

pub use error::{QueueError, QueueResult};
pub use mode::{EnhancedMode, PermissionMode, hash_mode};
pub use normalize::{normalize_message, normalize_messages};
pub use options::TimelineOptions;
pub use queue::{Batch, MessageHook, ModeAwareQueue, ModeHashFn};
pub use reconcile::{BlockIndex, Reconciled, RenderBlock, ToolCallHandle, ToolCallView, reconcile};
pub use reduce::{BlockPath, ReducerContext, ReducerResult, reduce_chat_blocks, reduce_timeline};
pub use timeline::{Timeline, build_timeline};
pub use todos::{TodoItem, extract_todos};
pub use trace::trace_messages;
