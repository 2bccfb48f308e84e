mod async_tasks;
mod executor;
mod registry;

pub use async_tasks::AsyncTaskRegistry;
pub use executor::ToolExecutor;
pub use registry::Tool;
pub use registry::ToolRegistry;
