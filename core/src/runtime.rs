use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use agent_common::summarize_sandbox_policy;
use agent_protocol::ApprovalRecord;
use agent_protocol::Event;
use agent_protocol::EventMsg;
use agent_protocol::StreamEvent;
use agent_sandbox::CommandValidator;
use agent_sandbox::NetworkGuard;
use agent_sandbox::PathResolver;
use agent_sandbox::ResourceLimits;
use agent_sandbox::SandboxManager;
use async_channel::Sender;
use tokio::task::JoinHandle;

use crate::agent_loop::AgentLoop;
use crate::agent_loop::AgentLoopConfig;
use crate::agent_loop::CancelToken;
use crate::agent_loop::Model;
use crate::agent_loop::RunRequest;
use crate::agent_loop::RunResponse;
use crate::approval::ApprovalQueue;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::history::HistoryPersister;
use crate::history::HistoryStore;
use crate::hooks::HookExecutor;
use crate::middleware::MiddlewareChain;
use crate::tools::AsyncTaskRegistry;
use crate::tools::ToolExecutor;
use crate::tools::ToolRegistry;

/// Live per-session bookkeeping the facade needs beyond what the history
/// store and tool executor already track: the cancellation flag exposed to
/// callers and the handles of any task spawned on the session's behalf.
/// Dropping a `Session` aborts those tasks, so eviction and shutdown cannot
/// leak work running against a session nobody can reach any more.
struct Session {
    cancel: CancelToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// LRU table of resident sessions, capped at `max_sessions`. Eviction drops
/// the `Session` (aborting its tasks) and lets the caller release the
/// session's other footprint (history, scratch directory).
struct SessionTable {
    order: VecDeque<String>,
    sessions: HashMap<String, Session>,
    max_sessions: usize,
}

impl SessionTable {
    fn new(max_sessions: usize) -> Self {
        Self {
            order: VecDeque::new(),
            sessions: HashMap::new(),
            max_sessions: max_sessions.max(1),
        }
    }

    fn touch(&mut self, session_id: &str) {
        self.order.retain(|id| id != session_id);
        self.order.push_back(session_id.to_string());
    }

    /// Inserts a freshly started session, evicting the least-recently-used
    /// one if the table is at capacity. Returns the evicted session id, if
    /// any, so the caller can release its external footprint.
    fn insert(&mut self, session_id: &str) -> Option<String> {
        let evicted = if self.sessions.len() >= self.max_sessions && !self.sessions.contains_key(session_id) {
            self.order.pop_front()
        } else {
            None
        };
        if let Some(id) = &evicted {
            self.sessions.remove(id);
        }
        self.sessions.insert(
            session_id.to_string(),
            Session {
                cancel: CancelToken::new(),
                tasks: Vec::new(),
            },
        );
        self.touch(session_id);
        evicted
    }

    fn remove(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.order.retain(|id| id != session_id);
    }

    fn cancel_token(&self, session_id: &str) -> Option<CancelToken> {
        self.sessions.get(session_id).map(|s| s.cancel.clone())
    }

    fn track_task(&mut self, session_id: &str, handle: JoinHandle<()>) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.tasks.push(handle);
        } else {
            handle.abort();
        }
    }
}

/// Composition root (C10): owns every component in C1-C9 and the session
/// lifecycle layered over them. Constructed once from an immutable
/// [`RuntimeConfig`]; a config reload means building a fresh `Runtime`
/// rather than mutating this one in place (§9).
pub struct Runtime {
    config: Arc<RuntimeConfig>,
    hooks: Arc<HookExecutor>,
    approvals: Arc<ApprovalQueue>,
    sandbox: Arc<SandboxManager>,
    registry: Arc<ToolRegistry>,
    history: Arc<HistoryStore>,
    history_persister: Option<Arc<HistoryPersister>>,
    async_tasks: Arc<AsyncTaskRegistry>,
    agent: Arc<AgentLoop>,
    sessions: Mutex<SessionTable>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        model: Arc<dyn Model>,
        registry: ToolRegistry,
        middleware: MiddlewareChain,
    ) -> Result<Self, RuntimeError> {
        let config = Arc::new(config);

        let hooks = Arc::new(HookExecutor::new(
            Duration::from_millis(config.middleware_default_timeout_ms),
            256,
        ));

        let approvals = Arc::new(ApprovalQueue::open(
            config.wal_dir.clone(),
            config.wal_segment_limit_bytes,
            config.record_log_path.clone(),
        )?);

        let mut path_resolver = PathResolver::new(config.sandbox_max_path_depth);
        for root in &config.sandbox_writable_roots {
            path_resolver.add_allowed_root(root);
        }
        let network_guard = NetworkGuard::new(config.sandbox_network_domains.clone());
        let command_validator = CommandValidator::new(config.sandbox_max_command_args, config.sandbox_max_command_bytes);
        let sandbox = Arc::new(SandboxManager::new(
            path_resolver,
            network_guard,
            command_validator,
            ResourceLimits::default(),
        ));

        let registry = Arc::new(registry);
        let history = Arc::new(HistoryStore::new(config.history_token_budget));
        let history_persister = config.history_persist_root.clone().map(|root| Arc::new(HistoryPersister::new(root)));
        let async_tasks = Arc::new(AsyncTaskRegistry::new(config.scratch_root.clone()));
        let middleware = Arc::new(middleware);

        let tools = Arc::new(ToolExecutor::new(
            registry.clone(),
            hooks.clone(),
            approvals.clone(),
            sandbox.clone(),
            Duration::from_millis(config.tool_default_timeout_ms),
            config.approval_ask_by_default,
        ));

        let agent = Arc::new(AgentLoop::new(
            model,
            tools,
            registry.clone(),
            history.clone(),
            hooks.clone(),
            middleware,
            AgentLoopConfig {
                max_iterations: config.agent_max_iterations,
                stream_capacity: config.stream_channel_capacity,
            },
        ));

        let max_sessions = config.max_sessions;

        Ok(Self {
            config,
            hooks,
            approvals,
            sandbox,
            registry,
            history,
            history_persister,
            async_tasks,
            agent,
            sessions: Mutex::new(SessionTable::new(max_sessions)),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Arc<SandboxManager> {
        &self.sandbox
    }

    pub fn approvals(&self) -> &Arc<ApprovalQueue> {
        &self.approvals
    }

    /// Approves a pending record, whitelisting it for this runtime's
    /// configured default TTL (§10.3). Call `approvals()` directly to
    /// override the TTL for a single decision.
    pub fn approve(&self, id: u64, comment: impl Into<String>) -> Result<ApprovalRecord, RuntimeError> {
        Ok(self.approvals.approve(id, comment, self.config.whitelist_default_ttl_seconds)?)
    }

    /// Builds an empty workflow [`Graph`] pre-configured with this runtime's
    /// `workflow_branch_timeout_ms` (§10.3), so every `Parallel` node the
    /// caller adds inherits the bound without repeating it per-graph.
    pub fn new_workflow_graph(&self) -> crate::workflow::Graph {
        let mut graph = crate::workflow::Graph::new();
        graph.set_branch_timeout(Duration::from_millis(self.config.workflow_branch_timeout_ms));
        graph
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Registers `session_id`, evicting the least-recently-used session if
    /// the table is already at `max_sessions`, and publishes `SessionStart`.
    pub fn start_session(&self, session_id: &str) {
        let evicted = self.sessions.lock().expect("session table lock poisoned").insert(session_id);
        if let Some(evicted_id) = evicted {
            self.release_session_footprint(&evicted_id);
            tracing::info!(session_id = %evicted_id, "session evicted to admit a new one");
        }

        let policy = summarize_sandbox_policy(
            &self.config.sandbox_writable_roots,
            &self.config.sandbox_network_domains,
            ResourceLimits::default(),
        );
        tracing::info!(session_id, sandbox = %policy, "session started");

        self.hooks.publish(Event::new(EventMsg::SessionStart {
            session_id: session_id.to_string(),
        }));
    }

    /// Ends `session_id` explicitly: publishes `SessionEnd`, releases its
    /// scratch directory and history, and drops its `Session` bookkeeping
    /// (aborting any still-running tasks).
    pub fn end_session(&self, session_id: &str) {
        self.hooks.publish(Event::new(EventMsg::SessionEnd {
            session_id: session_id.to_string(),
        }));
        self.release_session_footprint(session_id);
        self.sessions.lock().expect("session table lock poisoned").remove(session_id);
    }

    fn release_session_footprint(&self, session_id: &str) {
        self.async_tasks.release_session(session_id);
        if let Some(persister) = &self.history_persister {
            let snapshot = crate::history::SessionSnapshot {
                session_id: session_id.to_string(),
                created_at: time::OffsetDateTime::now_utc(),
                tags: HashMap::new(),
                messages: self.history.snapshot(session_id),
            };
            if !snapshot.messages.is_empty() {
                if let Err(err) = persister.save(&snapshot) {
                    tracing::warn!(session_id, error = %err, "failed to persist session history on release");
                }
            }
        }
        self.history.clear(session_id);
    }

    /// Runs one agent turn for `session_id` to completion, implicitly
    /// starting the session if it is not already resident.
    pub async fn run(&self, session_id: &str, prompt: impl Into<String>, tool_whitelist: Option<HashSet<String>>) -> Result<RunResponse, RuntimeError> {
        let cancel = self.ensure_session(session_id);
        self.agent
            .run(
                RunRequest {
                    session_id: session_id.to_string(),
                    prompt: prompt.into(),
                    tool_whitelist,
                },
                cancel,
            )
            .await
    }

    /// Streaming variant of [`Runtime::run`]; `events` receives the agent's
    /// [`StreamEvent`] sequence as it runs.
    pub async fn run_streaming(
        &self,
        session_id: &str,
        prompt: impl Into<String>,
        tool_whitelist: Option<HashSet<String>>,
        events: Sender<StreamEvent>,
    ) -> Result<RunResponse, RuntimeError> {
        let cancel = self.ensure_session(session_id);
        self.agent
            .run_streaming(
                RunRequest {
                    session_id: session_id.to_string(),
                    prompt: prompt.into(),
                    tool_whitelist,
                },
                cancel,
                events,
            )
            .await
    }

    /// Signals cancellation for an in-flight run on `session_id`, if one is
    /// resident.
    pub fn cancel_session(&self, session_id: &str) {
        if let Some(cancel) = self.sessions.lock().expect("session table lock poisoned").cancel_token(session_id) {
            cancel.cancel();
        }
    }

    /// Associates a background task with `session_id` so it is aborted when
    /// the session is evicted or explicitly ended (§10.5: `Drop for
    /// Session` semantics). A task for a session that is not resident is
    /// aborted immediately rather than leaked.
    pub fn track_session_task(&self, session_id: &str, handle: JoinHandle<()>) {
        self.sessions.lock().expect("session table lock poisoned").track_task(session_id, handle);
    }

    fn ensure_session(&self, session_id: &str) -> CancelToken {
        let mut table = self.sessions.lock().expect("session table lock poisoned");
        if let Some(token) = table.cancel_token(session_id) {
            table.touch(session_id);
            return token;
        }
        drop(table);
        self.start_session(session_id);
        self.sessions
            .lock()
            .expect("session table lock poisoned")
            .cancel_token(session_id)
            .expect("just inserted")
    }
}

#[cfg(test)]
mod tests {
    use agent_protocol::Message;
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::agent_loop::ModelResponse;
    use crate::agent_loop::Usage;

    struct StaticModel;

    #[async_trait]
    impl Model for StaticModel {
        async fn complete(&self, _history: &[Message], _tool_schemas: &[Value]) -> Result<ModelResponse, String> {
            Ok(ModelResponse {
                message: Message::assistant("ack"),
                usage: Usage::default(),
            })
        }
    }

    fn build_runtime(dir: &std::path::Path, max_sessions: usize) -> Runtime {
        let config = RuntimeConfig {
            wal_dir: dir.join("wal"),
            record_log_path: dir.join("approvals.jsonl"),
            scratch_root: dir.join("scratch"),
            max_sessions,
            ..RuntimeConfig::default()
        };
        Runtime::new(config, Arc::new(StaticModel), ToolRegistry::new(), MiddlewareChain::new(Duration::from_secs(1))).expect("runtime")
    }

    #[tokio::test]
    async fn run_starts_a_session_implicitly_and_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = build_runtime(dir.path(), 8);

        let response = runtime.run("s1", "hello", None).await.expect("run");
        assert_eq!(response.output, "ack");
    }

    #[tokio::test]
    async fn evicting_a_session_releases_its_scratch_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = build_runtime(dir.path(), 1);

        runtime.start_session("first");
        let task_dir = runtime.async_tasks.register("first", "task-a").expect("register task");
        assert!(task_dir.exists());

        runtime.start_session("second");
        assert!(!task_dir.exists(), "starting a second session should evict the first");
    }

    #[tokio::test]
    async fn ending_a_session_aborts_its_tracked_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = build_runtime(dir.path(), 8);

        runtime.start_session("s1");
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag_clone = flag.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag_clone.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        runtime.track_session_task("s1", handle);

        runtime.end_session("s1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn end_session_removes_it_from_the_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = build_runtime(dir.path(), 8);

        runtime.start_session("s1");
        assert!(runtime.sessions.lock().expect("lock").cancel_token("s1").is_some());

        runtime.end_session("s1");
        assert!(runtime.sessions.lock().expect("lock").cancel_token("s1").is_none());
    }
}
