//! Error types for the laminard service.

use crate::engine::EngineEvent;

/// Errors that can occur in the laminard service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] laminar_config::error::Error),

    #[error(transparent)]
    Model(#[from] laminar_models::error::Error),

    #[error(transparent)]
    EngineEventSend(#[from] tokio::sync::mpsc::error::SendError<EngineEvent>),

    /// The engine loop went away before replying.
    #[error(transparent)]
    EngineGone(#[from] tokio::sync::oneshot::error::RecvError),

    /// Queue request for a job with no `.run` script.
    #[error("Unknown job {0}")]
    UnknownJob(String),
}
