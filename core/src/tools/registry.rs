use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;

/// External contract a tool implementation fulfils (§6): a stable name, a
/// description, a JSON-schema-shaped parameter schema, and an async
/// executor. Async-mode tools (e.g. a backgrounded shell) return
/// immediately with a task id in `ToolResult::data` and report
/// `is_async() == true` so the executor skips the normal timeout wrap.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;

    fn is_async(&self) -> bool {
        false
    }

    async fn execute(&self, params: Value) -> agent_protocol::ToolResult;
}

/// Maps lowercased tool name → implementation. Mutable only at construction
/// time (§5 "Tool Registry: many readers, no writers after startup").
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let key = tool.name().to_lowercase();
        if self.tools.contains_key(&key) {
            return Err(ToolError::DuplicateTool(tool.name().to_string()));
        }
        self.tools.insert(key, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name.to_lowercase()).cloned()
    }

    /// Tools sorted by name, for deterministic schema export (§4.5).
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
