//! Run entity: one execution attempt of a job.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use laminar_protocol::RunState;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::error;
use uuid::Uuid;

/// One script in a run's sequence, with the directory it executes in.
///
/// Everything runs in the per-build directory except the workspace init
/// script.
#[derive(Debug, Clone)]
pub struct Script {
    pub path: PathBuf,
    pub cwd: PathBuf,
}

/// One execution attempt of a job, identified by `(name, build)`.
///
/// Owned by the engine loop for its whole lifetime. The supervisor task and
/// the timeout task refer to it only by id and through the abort signal, so
/// neither keeps the run alive.
#[derive(Debug)]
pub struct Run {
    pub id: Uuid,
    pub name: String,
    /// Assigned at dispatch; 0 while queued.
    pub build: u32,
    /// Name of the node this run was dispatched to.
    pub node: String,
    pub queued_at: i64,
    pub started_at: i64,
    /// Cumulative outcome, worst-wins. Starts out as success and can only
    /// get worse; status documents report RUNNING while the run is active.
    pub result: RunState,
    /// Result of the job's previous build, exposed to scripts.
    pub last_result: RunState,
    pub params: HashMap<String, String>,
    pub parent_name: String,
    pub parent_build: i32,
    pub reason_msg: String,
    /// Combined stdout/stderr accumulated so far.
    pub log: String,
    pub scripts: Vec<Script>,
    pub env_files: Vec<PathBuf>,
    /// Wakes the supervisor to kill the currently running child.
    pub abort_signal: Arc<Notify>,
    pub timeout_task: Option<JoinHandle<()>>,
    started_tx: Option<oneshot::Sender<u32>>,
}

impl Run {
    /// Create a queued run. Control parameters (keys starting with `=`)
    /// are stripped from `params` and applied to the run itself; unknown
    /// ones are logged and dropped.
    pub fn new(
        name: impl Into<String>,
        mut params: HashMap<String, String>,
        queued_at: i64,
        started_tx: oneshot::Sender<u32>,
    ) -> Self {
        let mut parent_name = String::new();
        let mut parent_build = 0;
        let mut reason_msg = String::new();

        let control: Vec<String> = params.keys().filter(|k| k.starts_with('=')).cloned().collect();
        for key in control {
            let value = params.remove(&key).unwrap_or_default();
            match key.as_str() {
                "=parentJob" => parent_name = value,
                "=parentBuild" => parent_build = value.parse().unwrap_or(0),
                "=reason" => reason_msg = value,
                _ => error!(key = %key, "unknown internal job parameter"),
            }
        }

        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            build: 0,
            node: String::new(),
            queued_at,
            started_at: 0,
            result: RunState::Success,
            last_result: RunState::Unknown,
            params,
            parent_name,
            parent_build,
            reason_msg,
            log: String::new(),
            scripts: Vec::new(),
            env_files: Vec::new(),
            abort_signal: Arc::new(Notify::new()),
            timeout_task: None,
            started_tx: Some(started_tx),
        }
    }

    /// The queue reason, or an empty string when none was given.
    pub fn reason(&self) -> &str {
        &self.reason_msg
    }

    /// Record one script's exit.
    pub fn reaped(&mut self, success: bool) {
        let state = if success { RunState::Success } else { RunState::Failed };
        self.result = self.result.worst(state);
    }

    /// Mark the run aborted and kill its currently running child, if any.
    /// Scripts that have not run yet still run, so cleanup happens.
    pub fn abort(&mut self) {
        self.result = self.result.worst(RunState::Aborted);
        self.abort_signal.notify_waiters();
    }

    /// Signal the caller that queued this run that it has been dispatched.
    pub fn fulfill_started(&mut self) {
        if let Some(tx) = self.started_tx.take() {
            let _ = tx.send(self.build);
        }
    }

    pub fn cancel_timeout(&mut self) {
        if let Some(handle) = self.timeout_task.take() {
            handle.abort();
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        // the timeout callback must never outlive the run it watches
        self.cancel_timeout();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_run(params: HashMap<String, String>) -> Run {
        let (tx, _rx) = oneshot::channel();
        Run::new("job", params, 100, tx)
    }

    #[test]
    fn control_params_are_stripped_and_applied() {
        let params = HashMap::from([
            ("=parentJob".to_string(), "root".to_string()),
            ("=parentBuild".to_string(), "7".to_string()),
            ("=reason".to_string(), "nightly".to_string()),
            ("=bogus".to_string(), "dropped".to_string()),
            ("COLOR".to_string(), "blue".to_string()),
        ]);
        let run = new_run(params);

        assert_eq!(run.parent_name, "root");
        assert_eq!(run.parent_build, 7);
        assert_eq!(run.reason(), "nightly");
        assert!(!run.params.keys().any(|k| k.starts_with('=')));
        assert_eq!(run.params["COLOR"], "blue");
    }

    #[test]
    fn result_accumulates_worst_wins() {
        let mut run = new_run(HashMap::new());
        run.reaped(true);
        assert_eq!(run.result, RunState::Success);
        run.reaped(false);
        assert_eq!(run.result, RunState::Failed);
        run.reaped(true);
        assert_eq!(run.result, RunState::Failed);
    }

    #[test]
    fn abort_supersedes_failure() {
        let mut run = new_run(HashMap::new());
        run.reaped(false);
        run.abort();
        assert_eq!(run.result, RunState::Aborted);
        // a later successful cleanup script does not un-abort
        run.reaped(true);
        assert_eq!(run.result, RunState::Aborted);
    }

    #[test]
    fn started_signal_carries_build_number() {
        let (tx, mut rx) = oneshot::channel();
        let mut run = Run::new("job", HashMap::new(), 100, tx);
        run.build = 3;
        run.fulfill_started();
        assert_eq!(rx.try_recv().unwrap(), 3);
    }
}
