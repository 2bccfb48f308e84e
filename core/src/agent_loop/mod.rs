mod model;

pub use model::Model;
pub use model::ModelResponse;
pub use model::Usage;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use agent_protocol::Event;
use agent_protocol::EventMsg;
use agent_protocol::Message;
use agent_protocol::StopReason;
use agent_protocol::StreamEvent;
use async_channel::Sender;

use crate::error::RuntimeError;
use crate::history::HistoryStore;
use crate::hooks::HookExecutor;
use crate::middleware::MiddlewareChain;
use crate::middleware::RunState;
use crate::tools::ToolExecutor;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy)]
pub struct AgentLoopConfig {
    pub max_iterations: u32,
    pub stream_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: String,
    pub prompt: String,
    pub tool_whitelist: Option<HashSet<String>>,
}

#[derive(Debug, Clone)]
pub struct RunResponse {
    pub output: String,
    pub tool_call_count: usize,
    pub stop_reason: StopReason,
}

/// Shared cancellation flag for one `Run`; checked between suspension
/// points so inflight work returns promptly (§5).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the bounded iterative reasoning state machine of §4.8:
/// `Start → ModelCall → ToolLoop → Done`, or its streaming variant pushing
/// [`StreamEvent`]s.
pub struct AgentLoop {
    model: Arc<dyn Model>,
    tools: Arc<ToolExecutor>,
    registry: Arc<ToolRegistry>,
    history: Arc<HistoryStore>,
    hooks: Arc<HookExecutor>,
    middleware: Arc<MiddlewareChain>,
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn Model>,
        tools: Arc<ToolExecutor>,
        registry: Arc<ToolRegistry>,
        history: Arc<HistoryStore>,
        hooks: Arc<HookExecutor>,
        middleware: Arc<MiddlewareChain>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            model,
            tools,
            registry,
            history,
            hooks,
            middleware,
            config,
        }
    }

    pub async fn run(&self, request: RunRequest, cancel: CancelToken) -> Result<RunResponse, RuntimeError> {
        self.run_inner(request, cancel, None).await
    }

    pub async fn run_streaming(
        &self,
        request: RunRequest,
        cancel: CancelToken,
        events: Sender<StreamEvent>,
    ) -> Result<RunResponse, RuntimeError> {
        self.run_inner(request, cancel, Some(events)).await
    }

    async fn run_inner(
        &self,
        request: RunRequest,
        cancel: CancelToken,
        events: Option<Sender<StreamEvent>>,
    ) -> Result<RunResponse, RuntimeError> {
        let state = RunState::new();
        let session_id = request.session_id.clone();
        let run_id = uuid::Uuid::new_v4();
        tracing::debug!(%run_id, session_id, "agent run starting");

        emit(&events, StreamEvent::AgentStart { session_id: session_id.clone() }).await;
        self.middleware.run_before_agent(&state).await?;

        self.history.append(&session_id, Message::user(request.prompt))?;

        let tool_schemas: Vec<serde_json::Value> = self.registry.list().iter().map(|t| t.schema()).collect();

        let mut iteration = 0u32;
        let mut total_executed = 0usize;
        let (output, stop_reason, tool_call_count) = loop {
            if cancel.is_cancelled() {
                break (String::new(), StopReason::Cancelled, total_executed);
            }

            emit(&events, StreamEvent::IterationStart { iteration }).await;
            let history_snapshot = self.history.snapshot(&session_id);

            self.middleware.run_before_model(&state, &history_snapshot).await?;
            let response = self.call_model(&history_snapshot, &tool_schemas, &events).await?;
            self.middleware.run_after_model(&state, &response.message).await?;

            self.history.append(&session_id, response.message.clone())?;
            emit(&events, StreamEvent::IterationStop { iteration }).await;

            if response.message.tool_calls.is_empty() {
                break (response.message.content.clone(), StopReason::Completed, total_executed);
            }

            iteration += 1;
            if iteration > self.config.max_iterations {
                break (response.message.content.clone(), StopReason::MaxIterations, total_executed);
            }

            for call in &response.message.tool_calls {
                if cancel.is_cancelled() {
                    break;
                }
                emit(
                    &events,
                    StreamEvent::ToolExecutionStart {
                        call_id: call.id.clone(),
                        tool: call.name.clone(),
                    },
                )
                .await;

                self.middleware.run_before_tool(&state, &call.name, &call.arguments).await?;
                let result = self
                    .tools
                    .execute(
                        &session_id,
                        &call.id,
                        &call.name,
                        call.arguments.clone(),
                        request.tool_whitelist.as_ref(),
                    )
                    .await;

                let result = match result {
                    Ok(result) => result,
                    Err(err) => {
                        emit(
                            &events,
                            StreamEvent::ToolExecutionStop {
                                call_id: call.id.clone(),
                                success: false,
                            },
                        )
                        .await;
                        return Err(RuntimeError::Tool(err));
                    }
                };
                self.middleware.run_after_tool(&state, &call.name, &result).await?;
                emit(
                    &events,
                    StreamEvent::ToolExecutionStop {
                        call_id: call.id.clone(),
                        success: result.success,
                    },
                )
                .await;

                self.history.append(&session_id, Message::tool(call.id.clone(), result.output.clone()))?;
                total_executed += 1;
            }
            if cancel.is_cancelled() {
                break (String::new(), StopReason::Cancelled, total_executed);
            }
        };

        self.middleware.run_after_agent(&state).await?;

        let reason_str = stop_reason.as_str().to_string();
        self.hooks
            .execute(&Event::new(EventMsg::Stop {
                session_id: session_id.clone(),
                reason: reason_str,
            }))
            .await;
        emit(&events, StreamEvent::AgentStop { reason: stop_reason }).await;

        Ok(RunResponse {
            output,
            tool_call_count,
            stop_reason,
        })
    }

    async fn call_model(
        &self,
        history: &[Message],
        tool_schemas: &[serde_json::Value],
        events: &Option<Sender<StreamEvent>>,
    ) -> Result<ModelResponse, RuntimeError> {
        match events {
            Some(sender) => self
                .model
                .complete_stream(history, tool_schemas, sender)
                .await
                .map_err(RuntimeError::Model),
            None => self.model.complete(history, tool_schemas).await.map_err(RuntimeError::Model),
        }
    }
}

async fn emit(events: &Option<Sender<StreamEvent>>, event: StreamEvent) {
    if let Some(sender) = events {
        if sender.try_send(event.clone()).is_err() {
            let _ = sender.send(StreamEvent::Backpressure).await;
            if sender.send(event).await.is_ok() {
                let _ = sender.send(StreamEvent::Recovered).await;
            }
        }
    }
}

pub fn default_config(max_iterations: u32, stream_capacity: usize) -> AgentLoopConfig {
    AgentLoopConfig {
        max_iterations,
        stream_capacity,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use agent_protocol::Role;
    use agent_protocol::ToolCall;
    use agent_protocol::ToolResult;
    use agent_sandbox::SandboxManager;
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::approval::ApprovalQueue;
    use crate::tools::Tool;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, params: serde_json::Value) -> ToolResult {
            ToolResult::ok(params.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }
    }

    /// Calls `echo` once, then stops.
    struct OneShotModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Model for OneShotModel {
        async fn complete(&self, _history: &[Message], _tool_schemas: &[serde_json::Value]) -> Result<ModelResponse, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let message = if n == 0 {
                Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "call-1".to_string(),
                        name: "echo".to_string(),
                        arguments: json!({"text": "hi"}),
                    }],
                )
            } else {
                Message::assistant("done")
            };
            Ok(ModelResponse {
                message,
                usage: Usage::default(),
            })
        }
    }

    /// Always returns a tool call, to exercise the max-iterations bound.
    struct CyclingModel;

    #[async_trait]
    impl Model for CyclingModel {
        async fn complete(&self, _history: &[Message], _tool_schemas: &[serde_json::Value]) -> Result<ModelResponse, String> {
            Ok(ModelResponse {
                message: Message::assistant_with_tool_calls(
                    "",
                    vec![ToolCall {
                        id: "call".to_string(),
                        name: "echo".to_string(),
                        arguments: json!({"text": "again"}),
                    }],
                ),
                usage: Usage::default(),
            })
        }
    }

    fn build_loop(dir: &std::path::Path, model: Arc<dyn Model>, max_iterations: u32) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).expect("register echo");
        let registry = Arc::new(registry);

        let hooks = Arc::new(HookExecutor::new(Duration::from_secs(1), 32));
        let approvals = Arc::new(
            ApprovalQueue::open(dir.join("wal"), agent_wal::DEFAULT_SEGMENT_LIMIT, dir.join("approvals.jsonl"))
                .expect("open approvals"),
        );
        let sandbox = Arc::new(SandboxManager::default());
        let tools = Arc::new(ToolExecutor::new(
            registry.clone(),
            hooks.clone(),
            approvals,
            sandbox,
            Duration::from_secs(5),
            false,
        ));
        let history = Arc::new(HistoryStore::new(100_000));
        let middleware = Arc::new(MiddlewareChain::new(Duration::from_secs(1)));

        AgentLoop::new(
            model,
            tools,
            registry,
            history,
            hooks,
            middleware,
            AgentLoopConfig {
                max_iterations,
                stream_capacity: 64,
            },
        )
    }

    #[tokio::test]
    async fn basic_tool_loop_completes_with_one_tool_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = build_loop(
            dir.path(),
            Arc::new(OneShotModel { calls: AtomicUsize::new(0) }),
            10,
        );

        let response = agent
            .run(
                RunRequest {
                    session_id: "S1".to_string(),
                    prompt: "run echo".to_string(),
                    tool_whitelist: None,
                },
                CancelToken::new(),
            )
            .await
            .expect("run");

        assert_eq!(response.output, "done");
        assert_eq!(response.stop_reason, StopReason::Completed);
        assert_eq!(response.tool_call_count, 1);

        let history = agent.history.snapshot("S1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[2].role, Role::Tool);
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn cycling_model_stops_at_max_iterations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let agent = build_loop(dir.path(), Arc::new(CyclingModel), 3);

        let response = agent
            .run(
                RunRequest {
                    session_id: "S2".to_string(),
                    prompt: "go".to_string(),
                    tool_whitelist: None,
                },
                CancelToken::new(),
            )
            .await
            .expect("run");

        assert_eq!(response.stop_reason, StopReason::MaxIterations);
        assert_eq!(response.tool_call_count, 3);
    }
}
