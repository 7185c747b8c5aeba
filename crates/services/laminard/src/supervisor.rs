//! Child supervisor: drives one run's scripts to completion.
//!
//! One task per run steps through the script sequence. For each script it
//! spawns a child with piped output, streams combined stdout/stderr back to
//! the engine loop as it arrives, then reaps the child and reports the exit
//! before advancing. Scripts of one run are strictly sequential.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use laminar_config::ConfFile;
use laminar_protocol::RunState;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::engine::EngineEvent;
use crate::run::Script;

/// Everything a supervisor task needs. The run itself stays on the engine
/// loop; the task refers to it only by id.
#[derive(Debug)]
pub struct ScriptJob {
    pub run_id: Uuid,
    pub name: String,
    pub build: u32,
    pub node: String,
    pub scripts: Vec<Script>,
    pub env_files: Vec<PathBuf>,
    pub params: HashMap<String, String>,
    pub last_result: RunState,
    pub workspace: PathBuf,
    pub archive: PathBuf,
    pub abort: Arc<Notify>,
}

pub fn spawn(job: ScriptJob, tx: mpsc::Sender<EngineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move { drive(job, tx).await })
}

async fn drive(job: ScriptJob, tx: mpsc::Sender<EngineEvent>) {
    let env = file_env(&job.env_files);
    // Local worst-wins mirror, only for the RESULT variable exported to
    // later scripts; the engine keeps the authoritative result.
    let mut result = RunState::Success;
    for script in &job.scripts {
        let outcome = run_script(&job, script, &env, result, &tx).await;
        if outcome.aborted {
            result = result.worst(RunState::Aborted);
        } else if !outcome.success {
            result = result.worst(RunState::Failed);
        }
        let _ = tx
            .send(EngineEvent::StepExited { run: job.run_id, success: outcome.success })
            .await;
    }
    let _ = tx.send(EngineEvent::RunDone { run: job.run_id }).await;
}

struct StepOutcome {
    success: bool,
    aborted: bool,
}

async fn run_script(
    job: &ScriptJob,
    script: &Script,
    env: &HashMap<String, String>,
    current: RunState,
    tx: &mpsc::Sender<EngineEvent>,
) -> StepOutcome {
    debug!(job = %job.name, build = job.build, script = %script.path.display(), "starting script");

    let mut child = match Command::new(&script.path)
        .current_dir(&script.cwd)
        .envs(env)
        .envs(&job.params)
        .env("JOB", &job.name)
        .env("RUN", job.build.to_string())
        .env("NODE", &job.node)
        .env("RESULT", current.to_string())
        .env("LAST_RESULT", job.last_result.to_string())
        .env("WORKSPACE", &job.workspace)
        .env("ARCHIVE", &job.archive)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // own process group, so an abort can take out grandchildren that
        // would otherwise keep the output pipes open
        .process_group(0)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            // treated as a failed script; the remaining scripts still run
            error!(script = %script.path.display(), "failed to spawn script: {err}");
            return StepOutcome { success: false, aborted: false };
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 1024];
    let mut err_buf = [0u8; 1024];
    let mut aborted = false;

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            chunk = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                match chunk {
                    Some(text) => {
                        let _ = tx.send(EngineEvent::Output { run: job.run_id, chunk: text }).await;
                    }
                    None => stdout = None,
                }
            }
            chunk = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                match chunk {
                    Some(text) => {
                        let _ = tx.send(EngineEvent::Output { run: job.run_id, chunk: text }).await;
                    }
                    None => stderr = None,
                }
            }
            _ = job.abort.notified() => {
                aborted = true;
                terminate(&child, job);
            }
        }
    }

    let success = match child.wait().await {
        Ok(status) => status.success(),
        Err(err) => {
            error!(job = %job.name, build = job.build, "failed to reap child: {err}");
            false
        }
    };

    StepOutcome { success, aborted }
}

/// SIGTERM the child's whole process group.
fn terminate(child: &Child, job: &ScriptJob) {
    // id() is None once the child has been reaped; nothing left to signal
    if let Some(pid) = child.id() {
        if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(job = %job.name, build = job.build, "failed to signal process group: {err}");
        }
    }
}

/// Read the next chunk from an open stream; `None` marks EOF.
async fn read_chunk<R>(stream: &mut Option<R>, buf: &mut [u8]) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(reader) => match reader.read(buf).await {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
        },
        None => std::future::pending().await,
    }
}

fn file_env(files: &[PathBuf]) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for path in files {
        match ConfFile::load(path) {
            Ok(conf) => {
                env.extend(conf.entries().map(|(k, v)| (k.to_string(), v.to_string())));
            }
            Err(err) => warn!(path = %path.display(), "skipping unreadable env file: {err}"),
        }
    }
    env
}
