mod shell;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use agent_protocol::Event;
use agent_protocol::EventMsg;
use agent_protocol::PermissionDecision;
use async_trait::async_trait;
use serde_json::Value;

pub use shell::ShellHook;

use crate::error::HookError;

/// A typed lifecycle hook. Every method has a no-op default; implementers
/// override only the events they care about, matching the teacher's pattern
/// of optional trait methods for partially-implemented collaborators.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_session_start(&self, _session_id: &str) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_session_end(&self, _session_id: &str) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_user_prompt_submit(&self, _session_id: &str, _prompt: &str) -> Result<(), HookError> {
        Ok(())
    }

    /// Returning `Some(value)` replaces the call's argument mapping before
    /// dispatch. Callers must deep-copy before handing it downstream.
    async fn on_pre_tool_use(
        &self,
        _session_id: &str,
        _call_id: &str,
        _tool: &str,
        _arguments: &Value,
    ) -> Result<Option<Value>, HookError> {
        Ok(None)
    }

    async fn on_post_tool_use(
        &self,
        _session_id: &str,
        _call_id: &str,
        _tool: &str,
        _latency_ms: u64,
        _success: bool,
        _error: Option<&str>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// `None` means the hook has no opinion; the caller falls back to its
    /// own default policy.
    async fn on_permission_request(
        &self,
        _session_id: &str,
        _call_id: &str,
        _tool: &str,
        _arguments: &Value,
    ) -> Result<Option<PermissionDecision>, HookError> {
        Ok(None)
    }

    async fn on_notification(&self, _session_id: &str, _message: &str) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_subagent_start(&self, _session_id: &str, _subagent_id: &str) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_subagent_stop(&self, _session_id: &str, _subagent_id: &str) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_stop(&self, _session_id: &str, _reason: &str) -> Result<(), HookError> {
        Ok(())
    }
}

/// Aggregated result of dispatching one event to every registered hook.
#[derive(Debug, Default, Clone)]
pub struct HookDispatchOutcome {
    pub tool_input_override: Option<Value>,
    pub permission_decision: Option<PermissionDecision>,
    /// Names of hooks whose callback returned an error; the executor never
    /// fails the event on their account (§4.3: hook failures are reported,
    /// not fatal, except where noted on `PreToolUse`/`PermissionRequest`).
    pub failed_hooks: Vec<String>,
}

struct DedupRing {
    capacity: usize,
    seen: Mutex<VecDeque<(String, String)>>,
}

impl DedupRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Returns `true` if `key` was already seen within the window.
    fn check_and_insert(&self, key: (String, String)) -> bool {
        let mut seen = self.seen.lock().expect("dedup ring lock poisoned");
        if seen.contains(&key) {
            return true;
        }
        if seen.len() >= self.capacity {
            seen.pop_front();
        }
        seen.push_back(key);
        false
    }
}

/// Dispatches typed lifecycle events to registered [`Hook`]s and
/// [`ShellHook`]s, deduplicating by `(type, id)` within a bounded window and
/// bounding every hook invocation with a shared timeout.
pub struct HookExecutor {
    typed: Vec<Arc<dyn Hook>>,
    shell: Vec<ShellHook>,
    dedup: DedupRing,
    hook_timeout: Duration,
}

impl HookExecutor {
    pub fn new(hook_timeout: Duration, dedup_window: usize) -> Self {
        Self {
            typed: Vec::new(),
            shell: Vec::new(),
            dedup: DedupRing::new(dedup_window.max(1)),
            hook_timeout,
        }
    }

    pub fn register_typed(&mut self, hook: Arc<dyn Hook>) {
        self.typed.push(hook);
    }

    pub fn register_shell(&mut self, hook: ShellHook) {
        self.shell.push(hook);
    }

    /// Synchronous fan-out: runs every matching hook concurrently, bounded
    /// by `hook_timeout`, and returns the combined outcome. `evt` carrying a
    /// dedup id that was already seen within the window short-circuits to an
    /// empty outcome without invoking any hook.
    pub async fn execute(&self, evt: &Event) -> HookDispatchOutcome {
        if let Some(key) = evt.dedup_key() {
            if self.dedup.check_and_insert(key) {
                tracing::debug!(kind = %evt.msg.kind(), "hook event suppressed by dedup");
                return HookDispatchOutcome::default();
            }
        }

        let typed_results = futures_lite_join_all(self.typed.iter().map(|hook| {
            let hook = hook.clone();
            let msg = evt.msg.clone();
            let timeout = self.hook_timeout;
            async move { run_typed(hook, msg, timeout).await }
        }))
        .await;

        let shell_results = futures_lite_join_all(self.shell.iter().filter(|hook| hook.matches(&evt.msg)).map(|hook| {
            let hook = hook.clone();
            let msg = evt.msg.clone();
            let timeout = self.hook_timeout;
            async move { run_shell(&hook, msg, timeout).await }
        }))
        .await;

        let mut outcome = HookDispatchOutcome::default();
        for result in typed_results.into_iter().chain(shell_results) {
            match result {
                Ok(partial) => {
                    if outcome.tool_input_override.is_none() {
                        outcome.tool_input_override = partial.tool_input_override;
                    }
                    if outcome.permission_decision.is_none() {
                        outcome.permission_decision = partial.permission_decision;
                    }
                }
                Err((name, err)) => {
                    tracing::warn!(hook = %name, error = %err, "hook failed");
                    outcome.failed_hooks.push(name);
                }
            }
        }
        outcome
    }

    /// Non-blocking variant: schedules `execute` on the tokio runtime and
    /// returns immediately, discarding the outcome (used for events with no
    /// gating semantics, e.g. `SessionStart`/`Notification`).
    pub fn publish(self: &Arc<Self>, evt: Event) {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            executor.execute(&evt).await;
        });
    }
}

type HookRunResult = Result<HookDispatchOutcome, (String, HookError)>;

async fn run_typed(hook: Arc<dyn Hook>, msg: EventMsg, timeout: Duration) -> HookRunResult {
    let name = hook.name().to_string();
    let fut = dispatch_typed(hook.as_ref(), &msg);
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(partial)) => Ok(partial),
        Ok(Err(err)) => Err((name, err)),
        Err(_) => Err((name.clone(), HookError::Timeout(name))),
    }
}

async fn dispatch_typed(hook: &dyn Hook, msg: &EventMsg) -> Result<HookDispatchOutcome, HookError> {
    let mut outcome = HookDispatchOutcome::default();
    match msg {
        EventMsg::SessionStart { session_id } => hook.on_session_start(session_id).await?,
        EventMsg::SessionEnd { session_id } => hook.on_session_end(session_id).await?,
        EventMsg::UserPromptSubmit { session_id, prompt } => {
            hook.on_user_prompt_submit(session_id, prompt).await?
        }
        EventMsg::PreToolUse {
            session_id,
            call_id,
            tool,
            arguments,
        } => {
            outcome.tool_input_override = hook
                .on_pre_tool_use(session_id, call_id, tool, arguments)
                .await?;
        }
        EventMsg::PostToolUse {
            session_id,
            call_id,
            tool,
            latency_ms,
            success,
            error,
        } => {
            hook.on_post_tool_use(session_id, call_id, tool, *latency_ms, *success, error.as_deref())
                .await?
        }
        EventMsg::PermissionRequest {
            session_id,
            call_id,
            tool,
            arguments,
        } => {
            outcome.permission_decision = hook
                .on_permission_request(session_id, call_id, tool, arguments)
                .await?;
        }
        EventMsg::Notification { session_id, message } => hook.on_notification(session_id, message).await?,
        EventMsg::SubagentStart { session_id, subagent_id } => {
            hook.on_subagent_start(session_id, subagent_id).await?
        }
        EventMsg::SubagentStop { session_id, subagent_id } => {
            hook.on_subagent_stop(session_id, subagent_id).await?
        }
        EventMsg::Stop { session_id, reason } => hook.on_stop(session_id, reason).await?,
    }
    Ok(outcome)
}

async fn run_shell(hook: &ShellHook, msg: EventMsg, timeout: Duration) -> HookRunResult {
    let name = hook.name.clone();
    match hook.run(&msg, timeout).await {
        Ok(shell_outcome) => {
            let mut outcome = HookDispatchOutcome::default();
            outcome.tool_input_override = shell_outcome.tool_input_override;
            if matches!(msg, EventMsg::PermissionRequest { .. }) {
                outcome.permission_decision = Some(PermissionDecision::from_exit_code(shell_outcome.exit_code));
            } else if matches!(msg, EventMsg::PreToolUse { .. }) && shell_outcome.exit_code != 0 {
                outcome.permission_decision = Some(PermissionDecision::Deny);
            }
            Ok(outcome)
        }
        Err(err) => Err((name, err)),
    }
}

/// Small local stand-in for `futures::future::join_all` so the crate does
/// not need to pull in the `futures` family for one call site; awaits every
/// future to completion concurrently via a `JoinSet`.
async fn futures_lite_join_all<F, T>(futures: impl IntoIterator<Item = F>) -> Vec<T>
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut set = tokio::task::JoinSet::new();
    for fut in futures {
        set.spawn(fut);
    }
    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        if let Ok(value) = joined {
            results.push(value);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use agent_protocol::EventMsg;
    use serde_json::json;

    use super::*;

    struct CountingHook {
        count: AtomicUsize,
    }

    #[async_trait]
    impl Hook for CountingHook {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_notification(&self, _session_id: &str, _message: &str) -> Result<(), HookError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct OverrideHook;

    #[async_trait]
    impl Hook for OverrideHook {
        fn name(&self) -> &str {
            "override"
        }

        async fn on_pre_tool_use(
            &self,
            _session_id: &str,
            _call_id: &str,
            _tool: &str,
            _arguments: &Value,
        ) -> Result<Option<Value>, HookError> {
            Ok(Some(json!({"patched": true})))
        }
    }

    #[tokio::test]
    async fn dedup_suppresses_second_publish_within_window() {
        let hook = Arc::new(CountingHook {
            count: AtomicUsize::new(0),
        });
        let mut executor = HookExecutor::new(Duration::from_secs(1), 32);
        executor.register_typed(hook.clone());
        let executor = Arc::new(executor);

        let evt = Event::new(EventMsg::Notification {
            session_id: "s".to_string(),
            message: "hi".to_string(),
        })
        .with_id("once");

        executor.execute(&evt).await;
        executor.execute(&evt).await;

        assert_eq!(hook.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_tool_use_override_is_surfaced() {
        let mut executor = HookExecutor::new(Duration::from_secs(1), 32);
        executor.register_typed(Arc::new(OverrideHook));
        let executor = Arc::new(executor);

        let evt = Event::new(EventMsg::PreToolUse {
            session_id: "s".to_string(),
            call_id: "c1".to_string(),
            tool: "echo".to_string(),
            arguments: json!({}),
        });

        let outcome = executor.execute(&evt).await;
        assert_eq!(outcome.tool_input_override, Some(json!({"patched": true})));
    }

    #[tokio::test]
    async fn permission_request_maps_shell_exit_code() {
        let mut executor = HookExecutor::new(Duration::from_secs(2), 32);
        executor.register_shell(ShellHook::new("deny", "*", "false"));
        let executor = Arc::new(executor);

        let evt = Event::new(EventMsg::PermissionRequest {
            session_id: "s".to_string(),
            call_id: "c1".to_string(),
            tool: "rm".to_string(),
            arguments: json!({}),
        });

        let outcome = executor.execute(&evt).await;
        assert_eq!(outcome.permission_decision, Some(PermissionDecision::Deny));
    }
}
