//! Unix socket message types for local engine communication.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::{MonitorScope, RunState};

/// Messages sent from a local client to the engine via unix socket.
#[derive(Debug, Serialize, Deserialize)]
pub enum SocketClientMessage {
    /// Queue a job and return immediately.
    Queue {
        job: String,
        #[serde(default)]
        params: HashMap<String, String>,
    },
    /// Queue a job and reply once it has been dispatched to a node.
    Start {
        job: String,
        #[serde(default)]
        params: HashMap<String, String>,
    },
    /// Queue a job and reply once the run has completed.
    Run {
        job: String,
        #[serde(default)]
        params: HashMap<String, String>,
    },
    /// Abort an active run.
    Abort { job: String, number: u32 },
    /// Fetch one status document for a scope.
    Status { scope: MonitorScope },
    /// Fetch the full log of an active or persisted run.
    Log { job: String, number: u32 },
    /// Attach as a live client; events stream until the connection closes.
    Watch { scope: MonitorScope },
}

/// Messages sent from the engine to a local client via unix socket.
#[derive(Debug, Serialize, Deserialize)]
pub enum SocketServerMessage {
    /// The job was queued.
    Queued { job: String },
    /// The run was dispatched.
    Started { job: String, number: u32 },
    /// The run completed.
    Completed(RunSummary),
    /// Abort request outcome.
    Aborted { found: bool },
    /// Response to a status request.
    Status(Event),
    /// A streamed event on a watch connection.
    Event(Event),
    /// Raw log output, either a full log or an incremental chunk.
    LogChunk(String),
    /// General error message.
    Error(String),
}

/// Summary of a finished run, delivered to completion waiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub name: String,
    pub number: u32,
    pub result: RunState,
    pub queued_at: i64,
    pub started_at: i64,
    pub completed_at: i64,
    pub reason: String,
}
