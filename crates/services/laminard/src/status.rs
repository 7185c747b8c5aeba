//! Status assembler: per-scope snapshot documents.
//!
//! Combines in-memory state (queue, active runs, nodes) with build-history
//! queries. For runs that are currently active, the in-memory values
//! supersede whatever the database says. A failed query degrades the
//! document to partial data; it never takes the engine down.

use std::path::Path;

use laminar_config::Settings;
use laminar_protocol::event::{
    AllRunning, AllStatus, Artifact, BuildRef, Event, HomeRunning, HomeStatus, JobRecent,
    JobRunning, JobStatus, JobSummary, QueuedJob, RecentBuild, RunStatus, SortSpec, StatusData,
};
use laminar_protocol::{MonitorScope, RunState};
use laminar_models::build::{BuildRecord, RUNS_PER_PAGE};
use serde_json::{Map, Value};
use tracing::error;

use crate::engine::{now, Delivery, EnginePrivate};

fn or_log<T>(result: laminar_models::prelude::Result<T>, default: T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            error!("status query failed: {err}");
            default
        }
    }
}

impl EnginePrivate {
    /// What a freshly attached client receives first: the accumulated log
    /// for a log scope, the scope's status document otherwise.
    pub(crate) fn initial_deliveries(&self, scope: &MonitorScope) -> Vec<Delivery> {
        match scope {
            MonitorScope::Log { name, number } => self
                .log_of(name, *number)
                .map(Delivery::Chunk)
                .into_iter()
                .collect(),
            _ => vec![Delivery::Event(self.status_event(scope))],
        }
    }

    pub(crate) fn status_event(&self, scope: &MonitorScope) -> Event {
        let data = match scope {
            MonitorScope::Home => StatusData::Home(self.home_status()),
            MonitorScope::All => StatusData::All(self.all_status()),
            MonitorScope::Job { name, page, field, order_desc } => {
                StatusData::Job(self.job_status(name, *page, field, *order_desc))
            }
            MonitorScope::Run { name, number } | MonitorScope::Log { name, number } => {
                StatusData::Run(self.run_status(name, *number))
            }
        };
        Event::Status { title: self.settings.title.clone(), time: now(), data }
    }

    fn run_status(&self, job: &str, number: u32) -> RunStatus {
        let mut doc = RunStatus {
            queued: 0,
            started: 0,
            completed: None,
            result: RunState::Unknown,
            reason: String::new(),
            etc: None,
            latest_num: self.build_nums.get(job).copied().unwrap_or(0),
            artifacts: scan_artifacts(&self.settings, job, number),
        };

        match BuildRecord::fetch_summary(job, number, &self.db) {
            Ok(Some(row)) => {
                doc.queued = row.started_at - row.queued_at;
                doc.started = row.started_at;
                doc.completed = Some(row.completed_at);
                doc.result = RunState::from(row.result);
                doc.reason = row.reason;
            }
            Ok(None) => {}
            Err(err) => error!("status query failed: {err}"),
        }

        if let Some(run) = self.active.find(job, number) {
            doc.queued = run.started_at - run.queued_at;
            doc.started = run.started_at;
            doc.completed = None;
            doc.result = RunState::Running;
            doc.reason = run.reason().to_string();
            if let Some(duration) = or_log(BuildRecord::last_duration(job, &self.db), None) {
                doc.etc = Some(run.started_at + duration);
            }
        }

        doc
    }

    fn job_status(&self, job: &str, page: u32, field: &str, order_desc: bool) -> JobStatus {
        let recent = or_log(
            BuildRecord::history_page(job, page, field, order_desc, &self.db),
            Vec::new(),
        )
        .into_iter()
        .map(|row| JobRecent {
            number: row.number as u32,
            completed: row.completed_at,
            started: row.started_at,
            result: RunState::from(row.result),
            reason: row.reason,
        })
        .collect();

        let n_runs = or_log(BuildRecord::count_for_job(job, &self.db), 0);
        let pages = ((n_runs.max(1) - 1) / RUNS_PER_PAGE + 1) as u32;

        let mut running: Vec<&crate::run::Run> = self.active.by_name(job).collect();
        running.sort_by_key(|run| run.build);
        let running = running
            .into_iter()
            .map(|run| JobRunning {
                number: run.build,
                node: run.node.clone(),
                started: run.started_at,
                result: RunState::Running,
                reason: run.reason().to_string(),
            })
            .collect();

        let success = i32::from(RunState::Success);
        JobStatus {
            recent,
            pages,
            sort: SortSpec {
                page,
                field: field.to_string(),
                order: if order_desc { "dsc".into() } else { "asc".into() },
            },
            running,
            n_queued: self.queue.iter().filter(|run| run.name == job).count() as u32,
            last_success: or_log(BuildRecord::last_success(job, success, &self.db), None)
                .map(|(number, started)| BuildRef { number: number as u32, started }),
            last_failed: or_log(BuildRecord::last_failed(job, success, &self.db), None)
                .map(|(number, started)| BuildRef { number: number as u32, started }),
        }
    }

    fn all_status(&self) -> AllStatus {
        let jobs = or_log(BuildRecord::jobs_overview(&self.db), Vec::new())
            .into_iter()
            .map(|row| JobSummary {
                tags: self.tags_of(&row.name),
                name: row.name,
                number: row.number as u32,
                result: RunState::from(row.result),
                started: row.started_at,
                completed: row.completed_at,
            })
            .collect();

        let running = self
            .active
            .by_started()
            .into_iter()
            .map(|run| AllRunning {
                name: run.name.clone(),
                number: run.build,
                node: run.node.clone(),
                started: run.started_at,
                tags: self.tags_of(&run.name),
            })
            .collect();

        AllStatus { jobs, running }
    }

    fn home_status(&self) -> HomeStatus {
        let recent = or_log(BuildRecord::recent_completed(15, &self.db), Vec::new())
            .into_iter()
            .map(|row| RecentBuild {
                name: row.name,
                number: row.number as u32,
                node: row.node,
                started: row.started_at,
                completed: row.completed_at,
                result: RunState::from(row.result),
            })
            .collect();

        let running = self
            .active
            .by_started()
            .into_iter()
            .map(|run| HomeRunning {
                name: run.name.clone(),
                number: run.build,
                node: run.node.clone(),
                started: run.started_at,
                etc: or_log(BuildRecord::last_duration(&run.name, &self.db), None)
                    .map(|duration| run.started_at + duration),
            })
            .collect();

        let queued = self
            .queue
            .iter()
            .map(|run| QueuedJob { name: run.name.clone() })
            .collect();

        let mut executors_total = 0;
        let mut executors_busy = 0;
        for node in self.config.nodes.values() {
            executors_total += node.num_executors;
            executors_busy += node.busy_executors;
        }

        // per-result counts for each of the last seven UTC days
        let today = now() / 86400;
        let builds_per_day = (0..7)
            .rev()
            .map(|age| {
                let day = today - age;
                let counts =
                    or_log(BuildRecord::results_between(86400 * day, 86400 * (day + 1), &self.db), Vec::new());
                counts
                    .into_iter()
                    .map(|row| (RunState::from(row.result).to_string(), Value::from(row.count)))
                    .collect::<Map<String, Value>>()
            })
            .collect();

        let builds_per_job = or_log(BuildRecord::busiest_jobs(now() - 86400, &self.db), Vec::new())
            .into_iter()
            .map(|row| (row.name, Value::from(row.count)))
            .collect();

        let time_per_job = or_log(BuildRecord::slowest_jobs(now() - 7 * 86400, &self.db), Vec::new())
            .into_iter()
            .map(|row| (row.name, Value::from(row.average)))
            .collect();

        HomeStatus {
            recent,
            running,
            queued,
            executors_total,
            executors_busy,
            builds_per_day,
            builds_per_job,
            time_per_job,
        }
    }
}

/// Enumerate the preserved outputs of one build, recursively.
pub(crate) fn scan_artifacts(settings: &Settings, job: &str, number: u32) -> Vec<Artifact> {
    let root = settings.archive_root();
    let dir = settings.archive_dir(job, number);
    let mut artifacts = Vec::new();
    if dir.is_dir() {
        collect_artifacts(&root, &dir, &settings.archive_url, &dir, &mut artifacts);
    }
    artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
    artifacts
}

fn collect_artifacts(
    root: &Path,
    scope: &Path,
    archive_url: &str,
    dir: &Path,
    out: &mut Vec<Artifact>,
) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_artifacts(root, scope, archive_url, &path, out);
        } else if path.is_file() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let Ok(rel_root) = path.strip_prefix(root) else {
                continue;
            };
            let Ok(rel_scope) = path.strip_prefix(scope) else {
                continue;
            };
            out.push(Artifact {
                url: format!(
                    "{}/{}",
                    archive_url.trim_end_matches('/'),
                    rel_root.display()
                ),
                filename: rel_scope.display().to_string(),
                size: meta.len(),
            });
        }
    }
}
