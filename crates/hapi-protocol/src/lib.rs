//! Protocol types for HAPI agent sessions.
//!
//! Three layers live here, each owned by a different stage of the pipeline:
//!
//! - [`wire`]: envelopes as the hub relays them (one tagged union per backend).
//! - [`messages`]: the normalized message union every backend is mapped onto,
//!   plus the sidechain-traced wrapper.
//! - [`blocks`]: renderable chat blocks produced by the timeline reducer.
//!
//! [`agent_state`] carries the session's permission requests, which the
//! reducer consults as side context.

pub mod agent_state;
pub mod blocks;
pub mod events;
pub mod messages;
pub mod wire;

pub use agent_state::{AgentState, CompletedRequest, PermissionEntry, PermissionRequest};
pub use blocks::{
    ChatBlock, CliOutputBlock, CliOutputSource, EventBlock, PermissionStatus, TextBlock,
    ToolCallBlock, ToolPermission, ToolState,
};
pub use events::{AgentEvent, EventContent};
pub use messages::{
    AgentContent, MessageContent, NormalizedMessage, PermissionResult, ResultPermissions, Role,
    ToolCallContent, ToolResultContent, TracedMessage, Usage, UserContent,
};
pub use wire::{
    AgentRecordContent, CodexRecord, ContentBlock, MessageBody, MessageBodyContent, OutputMessage,
    OutputRecord, PlanRecord, RawMessage, RecordLineage, RoleWrappedRecord, SystemRecord,
    UserRecordContent,
};
