use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use agent_protocol::Message;
use async_trait::async_trait;
use serde_json::Value;

use crate::error::MiddlewareError;

/// Cross-middleware state for a single `Run`, keyed by string (§4.7). Reads
/// and writes are serialised through a mutex; the contract only promises
/// safety across the *sequential* hooks of one Run, never concurrent
/// mutation within it.
#[derive(Default)]
pub struct RunState {
    values: Mutex<HashMap<String, Value>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().expect("run state lock poisoned").get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().expect("run state lock poisoned").insert(key.into(), value);
    }
}

/// One onion layer around the agent loop (§4.7). Every interception point
/// has a no-op default; a middleware overrides only the points it needs.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn id(&self) -> &str;

    /// Higher sorts outer; ties broken by insertion order.
    fn priority(&self) -> i32 {
        0
    }

    async fn before_agent(&self, _state: &RunState) -> Result<(), MiddlewareError> {
        Ok(())
    }
    async fn after_agent(&self, _state: &RunState) -> Result<(), MiddlewareError> {
        Ok(())
    }
    async fn before_model(&self, _state: &RunState, _history: &[Message]) -> Result<(), MiddlewareError> {
        Ok(())
    }
    async fn after_model(&self, _state: &RunState, _response: &Message) -> Result<(), MiddlewareError> {
        Ok(())
    }
    async fn before_tool(&self, _state: &RunState, _tool: &str, _args: &Value) -> Result<(), MiddlewareError> {
        Ok(())
    }
    async fn after_tool(&self, _state: &RunState, _tool: &str, _result: &agent_protocol::ToolResult) -> Result<(), MiddlewareError> {
        Ok(())
    }
}

/// Ordered, priority-sorted set of middleware. `Before*` hooks run
/// highest-priority-first (outermost wraps first); `After*` hooks run in
/// reverse, so the chain closes symmetrically.
pub struct MiddlewareChain {
    plan: Vec<std::sync::Arc<dyn Middleware>>,
    hook_timeout: Duration,
}

impl MiddlewareChain {
    pub fn new(hook_timeout: Duration) -> Self {
        Self {
            plan: Vec::new(),
            hook_timeout,
        }
    }

    /// Registers `middleware`, keeping the plan sorted by priority
    /// descending then insertion order (stable sort preserves ties).
    pub fn register(&mut self, middleware: std::sync::Arc<dyn Middleware>) {
        self.plan.push(middleware);
        self.plan.sort_by_key(|m| std::cmp::Reverse(m.priority()));
    }

    pub fn ids_in_before_order(&self) -> Vec<String> {
        self.plan.iter().map(|m| m.id().to_string()).collect()
    }

    pub async fn run_before_agent(&self, state: &RunState) -> Result<(), MiddlewareError> {
        for middleware in &self.plan {
            self.timed(middleware.id(), middleware.before_agent(state)).await?;
        }
        Ok(())
    }

    pub async fn run_after_agent(&self, state: &RunState) -> Result<(), MiddlewareError> {
        for middleware in self.plan.iter().rev() {
            self.timed(middleware.id(), middleware.after_agent(state)).await?;
        }
        Ok(())
    }

    pub async fn run_before_model(&self, state: &RunState, history: &[Message]) -> Result<(), MiddlewareError> {
        for middleware in &self.plan {
            self.timed(middleware.id(), middleware.before_model(state, history)).await?;
        }
        Ok(())
    }

    pub async fn run_after_model(&self, state: &RunState, response: &Message) -> Result<(), MiddlewareError> {
        for middleware in self.plan.iter().rev() {
            self.timed(middleware.id(), middleware.after_model(state, response)).await?;
        }
        Ok(())
    }

    pub async fn run_before_tool(&self, state: &RunState, tool: &str, args: &Value) -> Result<(), MiddlewareError> {
        for middleware in &self.plan {
            self.timed(middleware.id(), middleware.before_tool(state, tool, args)).await?;
        }
        Ok(())
    }

    pub async fn run_after_tool(&self, state: &RunState, tool: &str, result: &agent_protocol::ToolResult) -> Result<(), MiddlewareError> {
        for middleware in self.plan.iter().rev() {
            self.timed(middleware.id(), middleware.after_tool(state, tool, result)).await?;
        }
        Ok(())
    }

    async fn timed<F>(&self, id: &str, fut: F) -> Result<(), MiddlewareError>
    where
        F: std::future::Future<Output = Result<(), MiddlewareError>>,
    {
        match tokio::time::timeout(self.hook_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(MiddlewareError::Timeout(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use super::*;

    struct RecordingMiddleware {
        id: String,
        priority: i32,
        log: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for RecordingMiddleware {
        fn id(&self) -> &str {
            &self.id
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        async fn before_agent(&self, _state: &RunState) -> Result<(), MiddlewareError> {
            self.log.lock().expect("log lock").push(format!("before:{}", self.id));
            Ok(())
        }
        async fn after_agent(&self, _state: &RunState) -> Result<(), MiddlewareError> {
            self.log.lock().expect("log lock").push(format!("after:{}", self.id));
            Ok(())
        }
    }

    struct SlowMiddleware;

    #[async_trait]
    impl Middleware for SlowMiddleware {
        fn id(&self) -> &str {
            "slow"
        }
        async fn before_agent(&self, _state: &RunState) -> Result<(), MiddlewareError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn before_hooks_run_priority_descending_after_hooks_reverse() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new(Duration::from_secs(1));
        chain.register(Arc::new(RecordingMiddleware {
            id: "low".to_string(),
            priority: 1,
            log: log.clone(),
        }));
        chain.register(Arc::new(RecordingMiddleware {
            id: "high".to_string(),
            priority: 10,
            log: log.clone(),
        }));

        let state = RunState::new();
        chain.run_before_agent(&state).await.expect("before");
        chain.run_after_agent(&state).await.expect("after");

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["before:high", "before:low", "after:low", "after:high"]
        );
    }

    #[tokio::test]
    async fn hook_exceeding_timeout_errors() {
        let mut chain = MiddlewareChain::new(Duration::from_millis(5));
        chain.register(Arc::new(SlowMiddleware));
        let state = RunState::new();
        let err = chain.run_before_agent(&state).await.expect_err("should time out");
        assert!(matches!(err, MiddlewareError::Timeout(_)));
    }
}
