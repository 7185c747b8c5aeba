//! Monitor scopes: what a connected client is looking at.

use serde::{Deserialize, Serialize};

fn default_sort_field() -> String {
    "number".into()
}

/// A client's declared interest filter for broadcasts.
///
/// Every broadcast is matched against each client's scope; only clients
/// whose scope accepts the event receive it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorScope {
    /// Dashboard aggregates.
    Home,
    /// The jobs index.
    All,
    /// One job's recent-builds page.
    Job {
        name: String,
        #[serde(default)]
        page: u32,
        #[serde(default = "default_sort_field")]
        field: String,
        #[serde(default)]
        order_desc: bool,
    },
    /// One run's status document and subsequent updates.
    Run { name: String, number: u32 },
    /// One run's log stream.
    Log { name: String, number: u32 },
}

impl MonitorScope {
    /// Whether a status broadcast about `(job, num)` matches this scope.
    /// `num` is `None` for events emitted before a build number is assigned.
    pub fn wants_status(&self, job: &str, num: Option<u32>) -> bool {
        match self {
            MonitorScope::Home | MonitorScope::All => true,
            MonitorScope::Job { name, .. } => name == job,
            MonitorScope::Run { name, number } => name == job && num == Some(*number),
            MonitorScope::Log { .. } => false,
        }
    }

    /// Whether log output of `(job, num)` matches this scope.
    pub fn wants_log(&self, job: &str, num: u32) -> bool {
        matches!(self, MonitorScope::Log { name, number } if name == job && *number == num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_scope(name: &str) -> MonitorScope {
        MonitorScope::Job {
            name: name.into(),
            page: 0,
            field: "number".into(),
            order_desc: true,
        }
    }

    #[test]
    fn home_and_all_want_everything() {
        assert!(MonitorScope::Home.wants_status("x", None));
        assert!(MonitorScope::All.wants_status("x", Some(3)));
    }

    #[test]
    fn job_scope_matches_by_name() {
        assert!(job_scope("build").wants_status("build", None));
        assert!(job_scope("build").wants_status("build", Some(7)));
        assert!(!job_scope("build").wants_status("deploy", Some(7)));
    }

    #[test]
    fn run_scope_needs_both_name_and_number() {
        let scope = MonitorScope::Run { name: "build".into(), number: 3 };
        assert!(scope.wants_status("build", Some(3)));
        assert!(!scope.wants_status("build", Some(4)));
        // queued events carry no build number yet
        assert!(!scope.wants_status("build", None));
    }

    #[test]
    fn log_scope_only_wants_its_log() {
        let scope = MonitorScope::Log { name: "build".into(), number: 3 };
        assert!(!scope.wants_status("build", Some(3)));
        assert!(scope.wants_log("build", 3));
        assert!(!scope.wants_log("build", 4));
        assert!(!scope.wants_log("deploy", 3));
    }
}
