//! Wire and data-model types shared across the runtime crates.
//!
//! Nothing in this crate performs I/O; it only defines the serializable
//! shapes that flow between the agent loop, the tool executor, the approval
//! queue, and the event/hook executor.

pub mod approval;
pub mod event;
pub mod message;
pub mod session;
pub mod stream;

pub use approval::ApprovalDecision;
pub use approval::ApprovalRecord;
pub use approval::WhitelistEntry;
pub use approval::WhitelistKey;
pub use event::Event;
pub use event::EventMsg;
pub use event::PermissionDecision;
pub use message::Message;
pub use message::Role;
pub use message::ToolCall;
pub use message::ToolResult;
pub use session::Session;
pub use session::SessionId;
pub use stream::StopReason;
pub use stream::StreamEvent;
