use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use agent_protocol::Event;
use agent_protocol::EventMsg;
use agent_protocol::PermissionDecision;
use agent_protocol::ToolResult;
use agent_sandbox::SandboxManager;
use rand::Rng;
use serde_json::Value;

use crate::approval::ApprovalQueue;
use crate::error::ToolError;
use crate::hooks::HookExecutor;

use super::registry::ToolRegistry;

/// Drives one tool call through the five-step dispatch order of §4.5:
/// PreToolUse → PermissionRequest/Approval → Sandbox consultation → invoke
/// → PostToolUse.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookExecutor>,
    approvals: Arc<ApprovalQueue>,
    sandbox: Arc<SandboxManager>,
    default_timeout: Duration,
    ask_by_default: bool,
    approval_poll_interval: Duration,
}

impl ToolExecutor {
    /// `ask_by_default` governs the fallback applied when no `PermissionRequest`
    /// hook expresses an opinion: `true` routes the call through the approval
    /// queue (bounded by `default_timeout`), `false` allows it outright. Mirrors
    /// `RuntimeConfig::approval_ask_by_default` (§10.3).
    pub fn new(
        registry: Arc<ToolRegistry>,
        hooks: Arc<HookExecutor>,
        approvals: Arc<ApprovalQueue>,
        sandbox: Arc<SandboxManager>,
        default_timeout: Duration,
        ask_by_default: bool,
    ) -> Self {
        Self {
            registry,
            hooks,
            approvals,
            sandbox,
            default_timeout,
            ask_by_default,
            approval_poll_interval: Duration::from_millis(25),
        }
    }

    pub async fn execute(
        &self,
        session_id: &str,
        call_id: &str,
        tool_name: &str,
        mut arguments: Value,
        whitelist: Option<&HashSet<String>>,
    ) -> Result<ToolResult, ToolError> {
        if let Some(whitelist) = whitelist {
            if !whitelist.contains(tool_name) {
                return Err(ToolError::NotWhitelisted(tool_name.to_string()));
            }
        }

        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        // 1. PreToolUse: a hook may deep-copy-replace the argument mapping.
        let pre_event = Event::new(EventMsg::PreToolUse {
            session_id: session_id.to_string(),
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            arguments: arguments.clone(),
        });
        let pre_outcome = self.hooks.execute(&pre_event).await;
        if let Some(replacement) = pre_outcome.tool_input_override {
            arguments = replacement;
        }

        // 2. PermissionRequest: allow/deny/ask, falling through to the
        // approval queue when a hook asks or expresses no opinion.
        let permission_event = Event::new(EventMsg::PermissionRequest {
            session_id: session_id.to_string(),
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            arguments: arguments.clone(),
        });
        let permission_outcome = self.hooks.execute(&permission_event).await;
        let no_opinion_default = if self.ask_by_default {
            PermissionDecision::Ask
        } else {
            PermissionDecision::Allow
        };
        match permission_outcome.permission_decision.unwrap_or(no_opinion_default) {
            PermissionDecision::Deny => {
                return Err(ToolError::PermissionDenied(tool_name.to_string()));
            }
            PermissionDecision::Allow => {}
            PermissionDecision::Ask => {
                self.await_approval(session_id, tool_name, &arguments).await?;
            }
        }

        // 3. Sandbox consultation over any declared resource claims.
        self.consult_sandbox(&arguments)?;

        // 4. Invoke with a per-call timeout.
        let start = Instant::now();
        let result = if tool.is_async() {
            tool.execute(arguments).await
        } else {
            match tokio::time::timeout(self.default_timeout, tool.execute(arguments)).await {
                Ok(result) => result,
                Err(_) => return Err(ToolError::Timeout(self.default_timeout)),
            }
        };
        let elapsed = start.elapsed();
        let latency_ms = elapsed.as_millis() as u64;
        tracing::debug!(tool = tool_name, elapsed = %agent_common::format_duration(elapsed), "tool call finished");

        // 5. PostToolUse.
        let post_event = Event::new(EventMsg::PostToolUse {
            session_id: session_id.to_string(),
            call_id: call_id.to_string(),
            tool: tool_name.to_string(),
            latency_ms,
            success: result.success,
            error: if result.success { None } else { Some(result.output.clone()) },
        });
        self.hooks.execute(&post_event).await;

        Ok(result.with_latency(latency_ms))
    }

    /// Polls the pending record until a terminal decision lands, bounded by
    /// `default_timeout` so an approval nobody answers cannot hang the call
    /// forever. A bound expiry transitions the record itself via
    /// `approvals.timeout()` rather than leaving it pending.
    async fn await_approval(&self, session_id: &str, tool_name: &str, arguments: &Value) -> Result<(), ToolError> {
        let (record, auto) = self.approvals.request(session_id, tool_name, arguments.clone())?;
        if auto {
            return Ok(());
        }

        let poll = async {
            loop {
                let current = self.approvals.get(record.id).ok_or(ToolError::Approval(
                    crate::error::ApprovalError::NotFound(record.id),
                ))?;
                match current.decision {
                    agent_protocol::ApprovalDecision::Pending => {
                        // Jitter avoids every waiter on a busy approval queue
                        // waking the lock on the same tick.
                        let jitter = rand::rng().random_range(0.8..1.2);
                        let delay_ms = (self.approval_poll_interval.as_millis() as f64 * jitter) as u64;
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    agent_protocol::ApprovalDecision::Approved | agent_protocol::ApprovalDecision::Auto => return Ok(()),
                    agent_protocol::ApprovalDecision::Rejected => {
                        return Err(ToolError::ApprovalRejected(tool_name.to_string()));
                    }
                    agent_protocol::ApprovalDecision::Timeout => {
                        return Err(ToolError::Timeout(self.default_timeout));
                    }
                }
            }
        };

        match tokio::time::timeout(self.default_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                let _ = self.approvals.timeout(record.id);
                Err(ToolError::Timeout(self.default_timeout))
            }
        }
    }

    fn consult_sandbox(&self, arguments: &Value) -> Result<(), ToolError> {
        if let Some(path) = arguments.get("path").and_then(Value::as_str) {
            self.sandbox.check_path(path)?;
        }
        if let Some(host) = arguments.get("host").and_then(Value::as_str) {
            self.sandbox.check_network(host)?;
        }
        if let Some(command) = arguments.get("command").and_then(Value::as_str) {
            self.sandbox.validate_command(command)?;
        }
        Ok(())
    }
}
