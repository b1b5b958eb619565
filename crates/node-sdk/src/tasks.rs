//! Task engine: per-type handler registry and total result normalization.
//!
//! [`TaskProcessor::process`] never fails: whatever a handler does — return
//! an error, panic, or succeed — the caller always gets exactly one
//! [`ResultEnvelope`] to send back.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use octo_protocol::{ResultEnvelope, TaskEnvelope};
use serde_json::{json, Value};

use crate::types::TaskError;

/// Reserved type every unregistered task falls back to.
pub const DEFAULT_TASK_TYPE: &str = "default";

/// Simulated work performed by the built-in `default` handler.
const DEFAULT_TASK_DELAY: Duration = Duration::from_millis(100);

/// Bounds for the built-in `sleep` handler, seconds.
const SLEEP_MIN_SECS: f64 = 0.1;
const SLEEP_MAX_SECS: f64 = 10.0;

/// Implement this trait to execute tasks dispatched by the server.
///
/// Handlers run inline on the connection's listen loop, so frames are
/// processed strictly in arrival order and a slow handler delays everything
/// behind it. Handlers needing concurrency should `tokio::spawn` their work
/// and return immediately.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute the task. The returned value becomes the `result` field of
    /// the result envelope; an error becomes its `error` field.
    async fn run(&self, task: &TaskEnvelope) -> Result<Value, TaskError>;
}

/// Registry of task handlers keyed by `task_type`.
///
/// Registration is replacement-by-key: the last handler registered for a
/// type wins, silently. Built-ins (`default`, `echo`, `sleep`) are installed
/// at construction and can be overridden the same way.
pub struct TaskProcessor {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskProcessor {
    pub fn new() -> Self {
        let mut processor = Self {
            handlers: HashMap::new(),
        };
        processor.register(DEFAULT_TASK_TYPE, DefaultTask);
        processor.register("echo", EchoTask);
        processor.register("sleep", SleepTask);
        processor
    }

    /// Register a handler for `task_type`, replacing any existing one.
    pub fn register<H: TaskHandler>(&mut self, task_type: impl Into<String>, handler: H) {
        let task_type = task_type.into();
        tracing::info!(task_type = %task_type, "registered task handler");
        self.handlers.insert(task_type, Arc::new(handler));
    }

    /// Execute one task and normalize the outcome.
    ///
    /// Unregistered types fall back to the `default` handler. Handler errors
    /// and panics are captured into a `failed` envelope; this method never
    /// returns an error.
    pub async fn process(&self, task: TaskEnvelope) -> ResultEnvelope {
        tracing::info!(task_id = %task.task_id, task_type = %task.task_type, "processing task");

        let Some(handler) = self
            .handlers
            .get(&task.task_type)
            .or_else(|| self.handlers.get(DEFAULT_TASK_TYPE))
            .cloned()
        else {
            // Only reachable if the caller replaced `default` and then
            // removed it, which the API does not allow; still total.
            return ResultEnvelope::failed(task.task_id, "no handler registered");
        };

        // catch_unwind: a panicking handler still yields a task_result.
        let outcome = AssertUnwindSafe(handler.run(&task)).catch_unwind().await;
        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(task_id = %task.task_id, "task completed");
                ResultEnvelope::completed(task.task_id, result)
            }
            Ok(Err(e)) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "task failed");
                ResultEnvelope::failed(task.task_id, e.to_string())
            }
            Err(_panic) => {
                tracing::error!(task_id = %task.task_id, "task handler panicked");
                ResultEnvelope::failed(task.task_id, "task handler panicked")
            }
        }
    }
}

impl Default for TaskProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// ── Built-in handlers ──────────────────────────────────────────────────

/// Fallback for unregistered task types: brief simulated work, then a
/// fixed completion message naming the task.
struct DefaultTask;

#[async_trait::async_trait]
impl TaskHandler for DefaultTask {
    async fn run(&self, task: &TaskEnvelope) -> Result<Value, TaskError> {
        tokio::time::sleep(DEFAULT_TASK_DELAY).await;
        Ok(json!(format!(
            "task {} completed (default handler)",
            task.task_id
        )))
    }
}

/// Returns the task payload unchanged, plus a processing timestamp.
struct EchoTask;

#[async_trait::async_trait]
impl TaskHandler for EchoTask {
    async fn run(&self, task: &TaskEnvelope) -> Result<Value, TaskError> {
        Ok(json!({
            "echo": task.data,
            "processed_at": Utc::now().timestamp(),
        }))
    }
}

/// Sleeps for `data.sleep_time` seconds (default 1), clamped to
/// [0.1, 10] after parsing. Non-numeric input is a failure, not a
/// silent default.
struct SleepTask;

#[async_trait::async_trait]
impl TaskHandler for SleepTask {
    async fn run(&self, task: &TaskEnvelope) -> Result<Value, TaskError> {
        let requested = match task.data.get("sleep_time") {
            None => 1.0,
            Some(v) => parse_sleep_secs(v)?,
        };
        let secs = requested.clamp(SLEEP_MIN_SECS, SLEEP_MAX_SECS);

        tracing::info!(secs, "executing sleep task");
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;

        Ok(json!(format!("sleep task completed, slept {secs}s")))
    }
}

/// Tolerates integer, float, or numeric-string input.
fn parse_sleep_secs(v: &Value) -> Result<f64, TaskError> {
    match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TaskError::InvalidArgs(format!("sleep_time out of range: {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| TaskError::InvalidArgs(format!("sleep_time is not numeric: {s:?}"))),
        other => Err(TaskError::InvalidArgs(format!(
            "sleep_time must be a number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octo_protocol::TaskStatus;

    fn task(task_type: &str, data: Value) -> TaskEnvelope {
        TaskEnvelope {
            task_id: "t-1".into(),
            task_type: task_type.into(),
            data,
        }
    }

    struct Boom;

    #[async_trait::async_trait]
    impl TaskHandler for Boom {
        async fn run(&self, _task: &TaskEnvelope) -> Result<Value, TaskError> {
            panic!("intentional panic for testing catch_unwind");
        }
    }

    struct Fixed(&'static str);

    #[async_trait::async_trait]
    impl TaskHandler for Fixed {
        async fn run(&self, _task: &TaskEnvelope) -> Result<Value, TaskError> {
            Ok(json!(self.0))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_type_falls_back_to_default() {
        let p = TaskProcessor::new();
        let result = p.process(task("no_such_type", json!({}))).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.task_id, "t-1");
        assert!(result
            .result
            .unwrap()
            .as_str()
            .unwrap()
            .contains("t-1"));
    }

    #[tokio::test]
    async fn echo_returns_data_with_timestamp() {
        let p = TaskProcessor::new();
        let result = p.process(task("echo", json!({"a": 1}))).await;
        assert_eq!(result.status, TaskStatus::Completed);
        let value = result.result.unwrap();
        assert_eq!(value["echo"], json!({"a": 1}));
        assert!(value["processed_at"].is_i64());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_clamps_low() {
        let p = TaskProcessor::new();
        let start = tokio::time::Instant::now();
        let result = p.process(task("sleep", json!({"sleep_time": 0}))).await;
        assert_eq!(result.status, TaskStatus::Completed);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
        assert!(result.result.unwrap().as_str().unwrap().contains("0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_clamps_high() {
        let p = TaskProcessor::new();
        let start = tokio::time::Instant::now();
        let result = p.process(task("sleep", json!({"sleep_time": 100}))).await;
        assert_eq!(result.status, TaskStatus::Completed);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));
        assert!(result.result.unwrap().as_str().unwrap().contains("10"));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_parses_numeric_string() {
        let p = TaskProcessor::new();
        let start = tokio::time::Instant::now();
        let result = p.process(task("sleep", json!({"sleep_time": "3"}))).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_defaults_to_one_second() {
        let p = TaskProcessor::new();
        let start = tokio::time::Instant::now();
        let result = p.process(task("sleep", json!({}))).await;
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn sleep_rejects_non_numeric_input() {
        let p = TaskProcessor::new();
        let result = p.process(task("sleep", json!({"sleep_time": "abc"}))).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("not numeric"));
        assert!(result.result.is_none());
    }

    #[tokio::test]
    async fn panicking_handler_yields_failed_envelope() {
        let mut p = TaskProcessor::new();
        p.register("boom", Boom);
        let result = p.process(task("boom", json!({}))).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut p = TaskProcessor::new();
        p.register("dup", Fixed("first"));
        p.register("dup", Fixed("second"));
        let result = p.process(task("dup", json!({}))).await;
        assert_eq!(result.result.unwrap(), json!("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn builtin_override_wins() {
        let mut p = TaskProcessor::new();
        p.register("echo", Fixed("not an echo"));
        let result = p.process(task("echo", json!({"a": 1}))).await;
        assert_eq!(result.result.unwrap(), json!("not an echo"));
    }
}
