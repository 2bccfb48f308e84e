use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use agent_protocol::EventMsg;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::HookError;

/// A subprocess hook selected by a pattern over the tool name carried by
/// `PreToolUse`/`PermissionRequest`/`PostToolUse` events (events without a
/// tool name always match). The event payload is written to the child's
/// stdin as JSON; a JSON object on stdout is parsed back for the special
/// `tool_input` override, everything else is exit-code driven.
#[derive(Debug, Clone)]
pub struct ShellHook {
    pub name: String,
    pub pattern: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<std::path::PathBuf>,
    pub env: HashMap<String, String>,
}

impl ShellHook {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn matches(&self, evt: &EventMsg) -> bool {
        match tool_name(evt) {
            Some(tool) => glob_match(&self.pattern, tool),
            None => true,
        }
    }

    /// Runs the subprocess, feeding it `evt` as JSON on stdin, and returns
    /// `(exit_code, tool_input_override)`.
    pub async fn run(&self, evt: &EventMsg, timeout: Duration) -> Result<ShellHookOutcome, HookError> {
        let payload = serde_json::to_vec(evt)?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(std::env::vars())
            .envs(self.env.clone())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
        }

        let wait = async {
            let output = child.wait_with_output().await?;
            Ok::<_, std::io::Error>(output)
        };

        let output = tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| HookError::Timeout(self.name.clone()))??;

        let exit_code = output.status.code().unwrap_or(-1);
        let tool_input_override = if output.stdout.is_empty() {
            None
        } else {
            match serde_json::from_slice::<Value>(&output.stdout) {
                Ok(Value::Object(map)) => map.get("tool_input").cloned(),
                _ => None,
            }
        };

        Ok(ShellHookOutcome {
            exit_code,
            tool_input_override,
        })
    }
}

pub struct ShellHookOutcome {
    pub exit_code: i32,
    pub tool_input_override: Option<Value>,
}

fn tool_name(evt: &EventMsg) -> Option<&str> {
    match evt {
        EventMsg::PreToolUse { tool, .. }
        | EventMsg::PostToolUse { tool, .. }
        | EventMsg::PermissionRequest { tool, .. } => Some(tool),
        _ => None,
    }
}

/// Minimal glob matcher supporting a single trailing `*` wildcard (`"git_*"`
/// matches `"git_commit"`); anything else is an exact, case-sensitive match.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}
