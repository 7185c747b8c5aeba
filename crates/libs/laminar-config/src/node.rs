//! Executor nodes.

use std::collections::BTreeSet;

/// Executors a node offers when its config does not say otherwise.
pub const DEFAULT_EXECUTORS: u32 = 6;

/// A local executor pool with a capacity and optional tags.
///
/// The empty name is reserved for the default node that exists whenever no
/// nodes are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub num_executors: u32,
    /// Incremented on dispatch, decremented when a run finishes.
    pub busy_executors: u32,
    pub tags: BTreeSet<String>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_executors: DEFAULT_EXECUTORS,
            busy_executors: 0,
            tags: BTreeSet::new(),
        }
    }

    /// Whether this node can accept a run of a job carrying `job_tags`.
    ///
    /// A full node never accepts. An untagged node accepts any job. A
    /// tagged node accepts only jobs sharing at least one of its tags,
    /// which rules out untagged jobs.
    pub fn can_queue(&self, job_tags: Option<&BTreeSet<String>>) -> bool {
        if self.busy_executors >= self.num_executors {
            return false;
        }
        if self.tags.is_empty() {
            return true;
        }
        match job_tags {
            Some(tags) => !self.tags.is_disjoint(tags),
            None => false,
        }
    }
}
