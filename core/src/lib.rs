//! Runtime core: the agent loop, its tool/approval/sandbox/history
//! collaborators, the event and middleware pipelines, and the workflow
//! graph executor, composed behind [`runtime::Runtime`].

pub mod agent_loop;
pub mod approval;
pub mod config;
pub mod error;
pub mod history;
pub mod hooks;
pub mod middleware;
pub mod runtime;
pub mod tools;
pub mod workflow;

pub use agent_loop::AgentLoop;
pub use agent_loop::AgentLoopConfig;
pub use agent_loop::CancelToken;
pub use agent_loop::Model;
pub use agent_loop::RunRequest;
pub use agent_loop::RunResponse;
pub use approval::ApprovalQueue;
pub use config::RuntimeConfig;
pub use error::Result;
pub use error::RuntimeError;
pub use runtime::Runtime;
