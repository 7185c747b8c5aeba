//! JSON messages broadcast on client channels.
//!
//! Every message serializes as `{type, data}`; status documents also carry
//! `title` and `time` at the top level. Log output is not an [`Event`], it
//! is relayed to log-scope clients as raw text chunks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::RunState;

/// A message on a client channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Per-scope snapshot document.
    Status {
        title: String,
        time: i64,
        data: StatusData,
    },
    /// A run entered the queue.
    JobQueued { data: JobQueued },
    /// A run was dispatched to a node.
    JobStarted { data: JobStarted },
    /// A run finished and was persisted.
    JobCompleted { data: JobCompleted },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQueued {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStarted {
    /// Position in the queue at dispatch time, 0 = head.
    pub queue_index: usize,
    pub name: String,
    /// Seconds spent queued before the run started.
    pub queued: i64,
    pub started: i64,
    pub number: u32,
    pub reason: String,
    /// Estimated time of completion, when a previous duration is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etc: Option<i64>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompleted {
    pub name: String,
    pub number: u32,
    pub queued: i64,
    pub completed: i64,
    pub started: i64,
    pub result: RunState,
    pub reason: String,
    pub tags: Vec<String>,
    pub artifacts: Vec<Artifact>,
}

/// One preserved output file under the archive tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    pub filename: String,
    pub size: u64,
}

/// Scope-dependent payload of a status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusData {
    Run(RunStatus),
    Job(JobStatus),
    All(AllStatus),
    Home(HomeStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub queued: i64,
    pub started: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<i64>,
    pub result: RunState,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etc: Option<i64>,
    pub latest_num: u32,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub recent: Vec<JobRecent>,
    pub pages: u32,
    pub sort: SortSpec,
    pub running: Vec<JobRunning>,
    pub n_queued: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<BuildRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failed: Option<BuildRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub page: u32,
    pub field: String,
    /// `"asc"` or `"dsc"`.
    pub order: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecent {
    pub number: u32,
    pub completed: i64,
    pub started: i64,
    pub result: RunState,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunning {
    pub number: u32,
    pub node: String,
    pub started: i64,
    pub result: RunState,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRef {
    pub number: u32,
    pub started: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllStatus {
    pub jobs: Vec<JobSummary>,
    pub running: Vec<AllRunning>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub name: String,
    pub number: u32,
    pub result: RunState,
    pub started: i64,
    pub completed: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllRunning {
    pub name: String,
    pub number: u32,
    pub node: String,
    pub started: i64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeStatus {
    pub recent: Vec<RecentBuild>,
    pub running: Vec<HomeRunning>,
    pub queued: Vec<QueuedJob>,
    pub executors_total: u32,
    pub executors_busy: u32,
    /// One object per UTC day, oldest first, keyed by result name.
    pub builds_per_day: Vec<Map<String, Value>>,
    /// Top jobs by build count in the last 24h, in query order.
    pub builds_per_job: Map<String, Value>,
    /// Top jobs by average duration in the last 7d, in query order.
    pub time_per_job: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentBuild {
    pub name: String,
    pub number: u32,
    pub node: String,
    pub started: i64,
    pub completed: i64,
    pub result: RunState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeRunning {
    pub name: String,
    pub number: u32,
    pub node: String,
    pub started: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etc: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub name: String,
}
