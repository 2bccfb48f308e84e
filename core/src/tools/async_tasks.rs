use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::ToolError;

/// Per-session scratch directory layout for asynchronous tool output (§6,
/// §9 "Large outputs"): `<scratch_root>/<session_id>/<task_id>/{stdout,stderr}.txt`.
pub struct AsyncTaskRegistry {
    scratch_root: PathBuf,
    tasks: Mutex<HashMap<String, TaskHandle>>,
}

#[derive(Debug, Clone)]
struct TaskHandle {
    session_id: String,
    dir: PathBuf,
}

impl AsyncTaskRegistry {
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a caller-supplied task id, creating its scratch directory.
    /// Rejects a second registration of the same id (§9 open-question
    /// decision) rather than silently overwriting it.
    pub fn register(&self, session_id: &str, task_id: &str) -> Result<PathBuf, ToolError> {
        let mut tasks = self.tasks.lock().expect("async task registry lock poisoned");
        if tasks.contains_key(task_id) {
            return Err(ToolError::DuplicateTaskId(task_id.to_string()));
        }
        let dir = self.scratch_root.join(session_id).join(task_id);
        fs::create_dir_all(&dir)?;
        tasks.insert(
            task_id.to_string(),
            TaskHandle {
                session_id: session_id.to_string(),
                dir: dir.clone(),
            },
        );
        Ok(dir)
    }

    pub fn stdout_path(&self, task_id: &str) -> Result<PathBuf, ToolError> {
        self.task_dir(task_id).map(|dir| dir.join("stdout.txt"))
    }

    pub fn stderr_path(&self, task_id: &str) -> Result<PathBuf, ToolError> {
        self.task_dir(task_id).map(|dir| dir.join("stderr.txt"))
    }

    fn task_dir(&self, task_id: &str) -> Result<PathBuf, ToolError> {
        let tasks = self.tasks.lock().expect("async task registry lock poisoned");
        tasks
            .get(task_id)
            .map(|handle| handle.dir.clone())
            .ok_or_else(|| ToolError::UnknownTaskId(task_id.to_string()))
    }

    pub fn unregister(&self, task_id: &str) {
        let mut tasks = self.tasks.lock().expect("async task registry lock poisoned");
        if let Some(handle) = tasks.remove(task_id) {
            let _ = fs::remove_dir_all(&handle.dir);
        }
    }

    /// Removes every task's scratch directory for a session, e.g. on
    /// session eviction (§3 "Eviction must also release ... scratch
    /// directories").
    pub fn release_session(&self, session_id: &str) {
        let mut tasks = self.tasks.lock().expect("async task registry lock poisoned");
        tasks.retain(|_, handle| handle.session_id != session_id);
        let session_dir = self.scratch_root.join(session_id);
        let _ = fs::remove_dir_all(session_dir);
    }
}

pub fn read_to_string_or_empty(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_creates_scratch_dir_and_rejects_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = AsyncTaskRegistry::new(dir.path());

        let task_dir = registry.register("s1", "task-1").expect("register");
        assert!(task_dir.exists());

        let err = registry.register("s1", "task-1").expect_err("duplicate");
        assert!(matches!(err, ToolError::DuplicateTaskId(_)));
    }

    #[test]
    fn unknown_task_id_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = AsyncTaskRegistry::new(dir.path());
        assert!(matches!(registry.stdout_path("missing"), Err(ToolError::UnknownTaskId(_))));
    }

    #[test]
    fn release_session_removes_its_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = AsyncTaskRegistry::new(dir.path());
        let task_dir = registry.register("s1", "task-1").expect("register");
        registry.release_session("s1");
        assert!(!task_dir.exists());
        assert!(matches!(registry.stdout_path("task-1"), Err(ToolError::UnknownTaskId(_))));
    }
}
