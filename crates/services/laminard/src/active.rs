//! Index of in-flight runs.

use std::collections::HashMap;

use uuid::Uuid;

use crate::run::Run;

/// Runs currently executing.
///
/// Three access paths are served from one map: by run identity (O(1), used
/// for event routing and removal on completion), by job name, and ordered
/// by start time. All access happens on the engine loop, which is what
/// keeps the views consistent.
#[derive(Debug, Default)]
pub struct ActiveRuns {
    runs: HashMap<Uuid, Run>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, run: Run) {
        self.runs.insert(run.id, run);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Run> {
        self.runs.remove(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Run> {
        self.runs.get_mut(&id)
    }

    pub fn find(&self, job: &str, number: u32) -> Option<&Run> {
        self.runs.values().find(|run| run.name == job && run.build == number)
    }

    pub fn find_mut(&mut self, job: &str, number: u32) -> Option<&mut Run> {
        self.runs.values_mut().find(|run| run.name == job && run.build == number)
    }

    /// All active runs of one job.
    pub fn by_name<'a>(&'a self, job: &'a str) -> impl Iterator<Item = &'a Run> {
        self.runs.values().filter(move |run| run.name == job)
    }

    /// All active runs, ordered by start time.
    pub fn by_started(&self) -> Vec<&Run> {
        let mut runs: Vec<&Run> = self.runs.values().collect();
        runs.sort_by_key(|run| (run.started_at, run.build));
        runs
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Run> {
        self.runs.values_mut()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    fn run(job: &str, build: u32, started_at: i64) -> Run {
        let (tx, _rx) = oneshot::channel();
        let mut run = Run::new(job, HashMap::new(), 0, tx);
        run.build = build;
        run.started_at = started_at;
        run
    }

    #[test]
    fn lookup_by_identity_name_and_start_order() {
        let mut active = ActiveRuns::new();
        let a1 = run("a", 1, 30);
        let a1_id = a1.id;
        active.insert(a1);
        active.insert(run("a", 2, 10));
        active.insert(run("b", 1, 20));

        assert_eq!(active.len(), 3);
        assert_eq!(active.by_name("a").count(), 2);
        assert!(active.find("b", 1).is_some());
        assert!(active.find("b", 2).is_none());

        let started: Vec<(String, u32)> = active
            .by_started()
            .iter()
            .map(|r| (r.name.clone(), r.build))
            .collect();
        assert_eq!(started, vec![("a".into(), 2), ("b".into(), 1), ("a".into(), 1)]);

        let removed = active.remove(a1_id).unwrap();
        assert_eq!(removed.build, 1);
        assert_eq!(active.by_name("a").count(), 1);
    }
}
