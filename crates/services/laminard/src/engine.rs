//! Core engine: queue admission, node matching, run lifecycle and client
//! fan-out.
//!
//! All engine state lives on one event-loop task: the configuration, the
//! build-number map, the queue, the active-run index, the client and waiter
//! sets and the database connection. Everything else (the socket front-end,
//! the per-run supervisor tasks, the timeout tasks) talks to it through
//! [`EngineEvent`]s, so no mutation ever races.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use laminar_config::{ConfFile, Configuration, Settings};
use laminar_models::build::BuildRecord;
use laminar_models::db::connection::DbConnection;
use laminar_models::logcodec;
use laminar_protocol::event::{Event, JobCompleted, JobQueued, JobStarted};
use laminar_protocol::socket_message::RunSummary;
use laminar_protocol::{MonitorScope, RunState};
use tokio::sync::mpsc::{channel, unbounded_channel, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::active::ActiveRuns;
use crate::prelude::*;
use crate::run::{Run, Script};
use crate::status::scan_artifacts;
use crate::supervisor::{self, ScriptJob};

/// Events processed by the engine loop.
#[derive(Debug)]
pub enum EngineEvent {
    QueueJob {
        name: String,
        params: HashMap<String, String>,
        reply: oneshot::Sender<Result<QueuedRun>>,
    },
    /// The cfg tree changed; reload and re-run admission.
    ConfigChanged,
    AbortRun {
        job: String,
        number: u32,
        reply: oneshot::Sender<bool>,
    },
    AbortAll,
    Attach {
        scope: MonitorScope,
        reply: oneshot::Sender<AttachedClient>,
    },
    Detach {
        client: Uuid,
    },
    AddWaiter {
        tx: UnboundedSender<RunSummary>,
    },
    GetStatus {
        scope: MonitorScope,
        reply: oneshot::Sender<Event>,
    },
    GetLog {
        job: String,
        number: u32,
        reply: oneshot::Sender<Option<String>>,
    },
    /// A chunk of child output arrived.
    Output { run: Uuid, chunk: String },
    /// One script of a run exited.
    StepExited { run: Uuid, success: bool },
    /// A run's supervisor finished the whole script sequence.
    RunDone { run: Uuid },
    /// A run's timeout elapsed.
    Timeout { run: Uuid },
}

/// Handle returned by [`Engine::queue_job`].
#[derive(Debug)]
pub struct QueuedRun {
    pub name: String,
    /// Resolves to the build number once the run is dispatched.
    pub started: oneshot::Receiver<u32>,
}

/// One message on a client channel: a JSON event or a raw log chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(Event),
    Chunk(String),
}

/// A registered client, as seen by its owner.
#[derive(Debug)]
pub struct AttachedClient {
    pub id: Uuid,
    pub rx: UnboundedReceiver<Delivery>,
}

struct Client {
    scope: MonitorScope,
    tx: UnboundedSender<Delivery>,
}

/// Cloneable handle to the engine loop.
#[derive(Clone)]
pub struct Engine {
    tx: Sender<EngineEvent>,
}

impl Engine {
    /// Create the engine and spawn its event loop.
    ///
    /// Loads the configuration and the per-job build numbers, then starts
    /// processing events until the handle (and every supervisor) is gone.
    pub fn create(settings: Settings, db: DbConnection) -> Result<(Engine, JoinHandle<()>)> {
        EnginePrivate::create(settings, db)
    }

    /// Queue a run of `name`. Fails with [`Error::UnknownJob`] when the job
    /// has no `.run` script.
    pub async fn queue_job(
        &self,
        name: impl Into<String>,
        params: HashMap<String, String>,
    ) -> Result<QueuedRun> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::QueueJob { name: name.into(), params, reply })
            .await?;
        rx.await?
    }

    /// Reload the configuration; queued runs that were waiting for a
    /// compatible node get another admission round.
    pub async fn notify_config_changed(&self) -> Result<()> {
        Ok(self.tx.send(EngineEvent::ConfigChanged).await?)
    }

    /// Abort one active run. Returns false when no such run is active.
    pub async fn abort(&self, job: impl Into<String>, number: u32) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::AbortRun { job: job.into(), number, reply })
            .await?;
        Ok(rx.await?)
    }

    /// Abort every active run.
    pub async fn abort_all(&self) -> Result<()> {
        Ok(self.tx.send(EngineEvent::AbortAll).await?)
    }

    /// Register a client; its first message is the scope's current state.
    pub async fn attach(&self, scope: MonitorScope) -> Result<AttachedClient> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineEvent::Attach { scope, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn detach(&self, client: Uuid) -> Result<()> {
        Ok(self.tx.send(EngineEvent::Detach { client }).await?)
    }

    /// Subscribe to every run completion.
    pub async fn add_waiter(&self) -> Result<UnboundedReceiver<RunSummary>> {
        let (tx, rx) = unbounded_channel();
        self.tx.send(EngineEvent::AddWaiter { tx }).await?;
        Ok(rx)
    }

    /// One status document for a scope.
    pub async fn status(&self, scope: MonitorScope) -> Result<Event> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(EngineEvent::GetStatus { scope, reply }).await?;
        Ok(rx.await?)
    }

    /// Full log of an active or persisted run.
    pub async fn log(&self, job: impl Into<String>, number: u32) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineEvent::GetLog { job: job.into(), number, reply })
            .await?;
        Ok(rx.await?)
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) struct EnginePrivate {
    pub(crate) settings: Settings,
    pub(crate) db: DbConnection,
    pub(crate) config: Configuration,
    pub(crate) build_nums: HashMap<String, u32>,
    pub(crate) queue: VecDeque<Run>,
    pub(crate) active: ActiveRuns,
    clients: HashMap<Uuid, Client>,
    waiters: Vec<UnboundedSender<RunSummary>>,
    tx: Sender<EngineEvent>,
}

impl EnginePrivate {
    fn create(settings: Settings, db: DbConnection) -> Result<(Engine, JoinHandle<()>)> {
        let (tx, rx) = channel(64);
        let mut config = Configuration::new();
        config.load(&settings);
        let build_nums = BuildRecord::latest_build_numbers(&db)?;

        let private = Self {
            settings,
            db,
            config,
            build_nums,
            queue: VecDeque::new(),
            active: ActiveRuns::new(),
            clients: HashMap::new(),
            waiters: Vec::new(),
            tx: tx.clone(),
        };
        let handle = private.start_loop(rx);
        Ok((Engine { tx }, handle))
    }

    fn start_loop(mut self, mut rx: Receiver<EngineEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle_event(event);
            }
        })
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::QueueJob { name, params, reply } => {
                let result = self.queue_job(name, params);
                let _ = reply.send(result);
            }
            EngineEvent::ConfigChanged => {
                self.config.load(&self.settings);
                // config change may allow stuck runs to dequeue
                self.assign_new_jobs();
            }
            EngineEvent::AbortRun { job, number, reply } => {
                let found = match self.active.find_mut(&job, number) {
                    Some(run) => {
                        info!(job = %job, build = number, "aborting run");
                        run.abort();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
            EngineEvent::AbortAll => {
                for run in self.active.values_mut() {
                    run.abort();
                }
            }
            EngineEvent::Attach { scope, reply } => {
                let client = self.attach(scope);
                let _ = reply.send(client);
            }
            EngineEvent::Detach { client } => {
                self.clients.remove(&client);
            }
            EngineEvent::AddWaiter { tx } => {
                self.waiters.push(tx);
            }
            EngineEvent::GetStatus { scope, reply } => {
                let _ = reply.send(self.status_event(&scope));
            }
            EngineEvent::GetLog { job, number, reply } => {
                let _ = reply.send(self.log_of(&job, number));
            }
            EngineEvent::Output { run, chunk } => self.handle_output(run, chunk),
            EngineEvent::StepExited { run, success } => {
                if let Some(run) = self.active.get_mut(run) {
                    run.reaped(success);
                }
            }
            EngineEvent::RunDone { run } => self.run_finished(run),
            EngineEvent::Timeout { run } => {
                if let Some(run) = self.active.get_mut(run) {
                    info!(job = %run.name, build = run.build, "run timed out, aborting");
                    run.abort();
                }
            }
        }
    }

    fn queue_job(&mut self, job: String, params: HashMap<String, String>) -> Result<QueuedRun> {
        if !self.settings.job_file(&job, "run").exists() {
            error!(job = %job, "queue request for non-existent job");
            return Err(Error::UnknownJob(job));
        }

        let (started_tx, started_rx) = oneshot::channel();
        let run = Run::new(job.clone(), params, now(), started_tx);
        self.queue.push_back(run);

        let event = Event::JobQueued { data: JobQueued { name: job.clone() } };
        self.broadcast(&event, |scope| scope.wants_status(&job, None));

        self.assign_new_jobs();
        Ok(QueuedRun { name: job, started: started_rx })
    }

    /// Walk the queue from the head, starting every run that can be
    /// admitted now. A run with no compatible node does not block later
    /// runs: it is skipped and retried on the next admission round.
    fn assign_new_jobs(&mut self) {
        let mut index = 0;
        while index < self.queue.len() {
            let run = self.queue.remove(index).expect("queue index in bounds");
            match self.try_start_run(run, index) {
                Ok(run) => self.active.insert(run),
                Err(run) => {
                    self.queue.insert(index, run);
                    index += 1;
                }
            }
        }
    }

    /// Attempt to dispatch one queued run. On success the run is started
    /// (scripts assembled, executor claimed, supervisor spawned) and
    /// returned as `Ok`; otherwise the untouched run is handed back.
    fn try_start_run(&mut self, mut run: Run, queue_index: usize) -> std::result::Result<Run, Run> {
        let job_tags = self.config.job_tags.get(&run.name);
        let Some(node_name) = self
            .config
            .nodes
            .values()
            .find(|node| node.can_queue(job_tags))
            .map(|node| node.name.clone())
        else {
            return Err(run);
        };

        let settings = &self.settings;

        // create a workspace for this job if it doesn't exist; its init
        // script runs exactly once, in the workspace
        let workspace = settings.workspace_dir(&run.name);
        if !workspace.exists() {
            if let Err(err) = std::fs::create_dir_all(&workspace) {
                error!(job = %run.name, "could not create workspace: {err}");
                return Err(run);
            }
            let init = settings.job_file(&run.name, "init");
            if init.exists() {
                run.scripts.push(Script { path: init, cwd: workspace.clone() });
            }
        }

        let build_num = self.build_nums.get(&run.name).copied().unwrap_or(0) + 1;

        let run_dir = settings.build_dir(&run.name, build_num);
        if run_dir.is_dir() {
            warn!(dir = %run_dir.display(), "run directory already exists, removing");
            if let Err(err) = std::fs::remove_dir_all(&run_dir) {
                warn!(dir = %run_dir.display(), "failed to remove run directory: {err}");
                return Err(run);
            }
        }
        if let Err(err) = std::fs::create_dir_all(&run_dir) {
            error!(dir = %run_dir.display(), "could not create run directory: {err}");
            return Err(run);
        }

        let archive = settings.archive_dir(&run.name, build_num);
        if archive.is_dir() {
            warn!(dir = %archive.display(), "archive directory already exists");
        } else if let Err(err) = std::fs::create_dir_all(&archive) {
            error!(dir = %archive.display(), "could not create archive directory: {err}");
            return Err(run);
        }

        // script sequence; only the .run script is mandatory
        for path in [
            settings.cfg_dir().join("before"),
            settings.node_file(&node_name, "before"),
            settings.job_file(&run.name, "before"),
        ] {
            if path.exists() {
                run.scripts.push(Script { path, cwd: run_dir.clone() });
            }
        }
        run.scripts.push(Script { path: settings.job_file(&run.name, "run"), cwd: run_dir.clone() });
        for path in [
            settings.job_file(&run.name, "after"),
            settings.node_file(&node_name, "after"),
            settings.cfg_dir().join("after"),
        ] {
            if path.exists() {
                run.scripts.push(Script { path, cwd: run_dir.clone() });
            }
        }

        for path in [
            settings.cfg_dir().join("env"),
            settings.node_file(&node_name, "env"),
            settings.job_file(&run.name, "env"),
        ] {
            if path.exists() {
                run.env_files.push(path);
            }
        }

        // per-job timeout, consulted at dispatch time
        let conf_path = settings.job_file(&run.name, "conf");
        if conf_path.exists() {
            let timeout = ConfFile::load(&conf_path)
                .map(|conf| conf.get_u32("TIMEOUT", 0))
                .unwrap_or(0);
            if timeout > 0 {
                run.timeout_task = Some(Self::timeout_task(self.tx.clone(), run.id, timeout));
            }
        }

        // claim the executor and commit the build number
        let node = self.config.nodes.get_mut(&node_name).expect("matched node exists");
        node.busy_executors += 1;
        run.node = node_name;
        run.started_at = now();
        run.build = build_num;
        self.build_nums.insert(run.name.clone(), build_num);
        run.last_result = BuildRecord::last_result(&run.name, &self.db)
            .ok()
            .flatten()
            .map(RunState::from)
            .unwrap_or(RunState::Unknown);

        info!(job = %run.name, build = run.build, node = %run.node, "starting run");

        let etc = BuildRecord::last_duration(&run.name, &self.db)
            .ok()
            .flatten()
            .map(|duration| now() + duration);
        let event = Event::JobStarted {
            data: JobStarted {
                queue_index,
                name: run.name.clone(),
                queued: run.started_at - run.queued_at,
                started: run.started_at,
                number: run.build,
                reason: run.reason().to_string(),
                etc,
                tags: self.tags_of(&run.name),
            },
        };
        let (job, number) = (run.name.clone(), run.build);
        // the run page of the same job also learns that a newer build
        // exists, so it can offer navigation to it
        self.broadcast(&event, |scope| {
            scope.wants_status(&job, Some(number))
                || matches!(scope, MonitorScope::Run { name, .. } if name == &job)
        });

        run.fulfill_started();

        supervisor::spawn(
            ScriptJob {
                run_id: run.id,
                name: run.name.clone(),
                build: run.build,
                node: run.node.clone(),
                scripts: run.scripts.clone(),
                env_files: run.env_files.clone(),
                params: run.params.clone(),
                last_result: run.last_result,
                workspace,
                archive,
                abort: run.abort_signal.clone(),
            },
            self.tx.clone(),
        );

        Ok(run)
    }

    fn timeout_task(tx: Sender<EngineEvent>, run: Uuid, timeout: u32) -> JoinHandle<()> {
        tokio::spawn(async move {
            sleep(Duration::from_secs(u64::from(timeout))).await;
            if let Err(err) = tx.send(EngineEvent::Timeout { run }).await {
                error!("failed to send timeout event: {err}");
            }
        })
    }

    fn handle_output(&mut self, run_id: Uuid, chunk: String) {
        let Some(run) = self.active.get_mut(run_id) else {
            return;
        };
        run.log.push_str(&chunk);
        let (job, number) = (run.name.clone(), run.build);
        self.clients.retain(|id, client| {
            if !client.scope.wants_log(&job, number) {
                return true;
            }
            if client.tx.send(Delivery::Chunk(chunk.clone())).is_err() {
                debug!(client = %id, "dropping disconnected client");
                return false;
            }
            true
        });
    }

    fn run_finished(&mut self, run_id: Uuid) {
        let Some(mut run) = self.active.remove(run_id) else {
            return;
        };
        run.cancel_timeout();

        match self.config.nodes.get_mut(&run.node) {
            Some(node) => node.busy_executors -= 1,
            None => warn!(node = %run.node, "node of finished run no longer configured"),
        }

        let completed_at = now();
        info!(job = %run.name, build = run.build, result = %run.result, "run completed");

        let (payload, log_len) = logcodec::encode_for_storage(&run.log);
        let record = BuildRecord {
            name: run.name.clone(),
            number: run.build as i32,
            node: run.node.clone(),
            queued_at: run.queued_at,
            started_at: run.started_at,
            completed_at,
            result: run.result.into(),
            output: payload,
            output_len: log_len,
            parent_job: run.parent_name.clone(),
            parent_build: run.parent_build,
            reason: run.reason().to_string(),
        };
        if let Err(err) = record.insert(&self.db) {
            error!(job = %run.name, build = run.build, "failed to persist build: {err}");
        }

        let event = Event::JobCompleted {
            data: JobCompleted {
                name: run.name.clone(),
                number: run.build,
                queued: run.started_at - run.queued_at,
                completed: completed_at,
                started: run.started_at,
                result: run.result,
                reason: run.reason().to_string(),
                tags: self.tags_of(&run.name),
                artifacts: scan_artifacts(&self.settings, &run.name, run.build),
            },
        };
        let (job, number) = (run.name.clone(), run.build);
        self.broadcast(&event, |scope| scope.wants_status(&job, Some(number)));

        let summary = RunSummary {
            name: run.name.clone(),
            number: run.build,
            result: run.result,
            queued_at: run.queued_at,
            started_at: run.started_at,
            completed_at,
            reason: run.reason().to_string(),
        };
        self.waiters.retain(|waiter| waiter.send(summary.clone()).is_ok());

        self.prune_run_dirs(&run.name);

        // an executor freed up; check the queue
        self.assign_new_jobs();
    }

    /// Remove old run directories, keeping the most recent
    /// `keep_run_dirs`. Counting back starts from the oldest still-active
    /// build of this job (other instances may still be using their
    /// directories), or from the latest build number when none are active.
    fn prune_run_dirs(&self, job: &str) {
        let keep = self.config.keep_run_dirs;
        if keep == 0 {
            return;
        }
        let oldest_active = match self.active.by_name(job).map(|run| run.build).min() {
            None => self.build_nums.get(job).copied().unwrap_or(0),
            Some(oldest) => oldest.saturating_sub(1),
        };
        let mut number = oldest_active as i64 - keep as i64;
        while number > 0 {
            let dir = self.settings.build_dir(job, number as u32);
            // once a directory is missing, everything older is assumed
            // gone too
            if !dir.exists() {
                break;
            }
            if let Err(err) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), "failed to prune run directory: {err}");
            }
            number -= 1;
        }
    }

    fn attach(&mut self, scope: MonitorScope) -> AttachedClient {
        let (tx, rx) = unbounded_channel();
        let id = Uuid::new_v4();
        for delivery in self.initial_deliveries(&scope) {
            let _ = tx.send(delivery);
        }
        self.clients.insert(id, Client { scope, tx });
        AttachedClient { id, rx }
    }

    fn broadcast(&mut self, event: &Event, filter: impl Fn(&MonitorScope) -> bool) {
        self.clients.retain(|id, client| {
            if !filter(&client.scope) {
                return true;
            }
            if client.tx.send(Delivery::Event(event.clone())).is_err() {
                debug!(client = %id, "dropping disconnected client");
                return false;
            }
            true
        });
    }

    pub(crate) fn tags_of(&self, job: &str) -> Vec<String> {
        self.config
            .job_tags
            .get(job)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Full log of an active or persisted run. A payload that fails to
    /// inflate is logged and omitted.
    pub(crate) fn log_of(&self, job: &str, number: u32) -> Option<String> {
        if let Some(run) = self.active.find(job, number) {
            return Some(run.log.clone());
        }
        match BuildRecord::fetch_output(job, number, &self.db) {
            Ok(Some((data, len))) => match logcodec::decode_from_storage(&data, len) {
                Ok(text) => Some(text),
                Err(err) => {
                    error!(job = %job, build = number, "failed to uncompress log: {err}");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                error!(job = %job, build = number, "failed to fetch log: {err}");
                None
            }
        }
    }
}
