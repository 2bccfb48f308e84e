use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

/// Concurrency-safe key/value store shared across a single workflow
/// `Run` (§3). Lifetime is exactly one `Execute` call.
#[derive(Default)]
pub struct ExecutionContext {
    values: Mutex<HashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_data(data: HashMap<String, Value>) -> Self {
        Self {
            values: Mutex::new(data),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().expect("execution context lock poisoned").get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.lock().expect("execution context lock poisoned").insert(key.into(), value);
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.values.lock().expect("execution context lock poisoned").remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.lock().expect("execution context lock poisoned").clone()
    }
}
