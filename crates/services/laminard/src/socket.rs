//! Unix socket front-end for local clients.
//!
//! Speaks line-delimited JSON: one [`SocketClientMessage`] per connection,
//! answered by one or more [`SocketServerMessage`]s. This is the surface
//! behind `LAMINAR_BIND_RPC`; queueing, waiting on runs, aborting and
//! status/log retrieval all go through here.

use std::path::PathBuf;

use laminar_config::Settings;
use laminar_protocol::socket_message::{SocketClientMessage, SocketServerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::{Delivery, Engine};
use crate::prelude::*;

async fn send_message(writer: &mut OwnedWriteHalf, response: SocketServerMessage) -> Result<()> {
    let serialized = serde_json::to_string(&response)?;
    writer.write_all(serialized.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn handle_message(
    writer: &mut OwnedWriteHalf,
    message: SocketClientMessage,
    engine: &Engine,
) -> Result<()> {
    match message {
        SocketClientMessage::Queue { job, params } => {
            match engine.queue_job(job.clone(), params).await {
                Ok(_) => send_message(writer, SocketServerMessage::Queued { job }).await,
                Err(err) => send_message(writer, SocketServerMessage::Error(err.to_string())).await,
            }
        }
        SocketClientMessage::Start { job, params } => {
            let queued = match engine.queue_job(job.clone(), params).await {
                Ok(queued) => queued,
                Err(err) => {
                    return send_message(writer, SocketServerMessage::Error(err.to_string())).await;
                }
            };
            match queued.started.await {
                Ok(number) => {
                    send_message(writer, SocketServerMessage::Started { job, number }).await
                }
                Err(_) => send_message(writer, SocketServerMessage::Error("engine stopped".into()))
                    .await,
            }
        }
        SocketClientMessage::Run { job, params } => {
            // subscribe before queueing so the completion cannot be missed
            let mut waiter = engine.add_waiter().await?;
            let queued = match engine.queue_job(job.clone(), params).await {
                Ok(queued) => queued,
                Err(err) => {
                    return send_message(writer, SocketServerMessage::Error(err.to_string())).await;
                }
            };
            let Ok(number) = queued.started.await else {
                return send_message(writer, SocketServerMessage::Error("engine stopped".into()))
                    .await;
            };
            send_message(writer, SocketServerMessage::Started { job: job.clone(), number }).await?;
            while let Some(summary) = waiter.recv().await {
                if summary.name == job && summary.number == number {
                    return send_message(writer, SocketServerMessage::Completed(summary)).await;
                }
            }
            send_message(writer, SocketServerMessage::Error("engine stopped".into())).await
        }
        SocketClientMessage::Abort { job, number } => {
            let found = engine.abort(job, number).await?;
            send_message(writer, SocketServerMessage::Aborted { found }).await
        }
        SocketClientMessage::Status { scope } => {
            let event = engine.status(scope).await?;
            send_message(writer, SocketServerMessage::Status(event)).await
        }
        SocketClientMessage::Log { job, number } => match engine.log(job, number).await? {
            Some(text) => send_message(writer, SocketServerMessage::LogChunk(text)).await,
            None => send_message(writer, SocketServerMessage::Error("no such run".into())).await,
        },
        SocketClientMessage::Watch { scope } => {
            let mut client = engine.attach(scope).await?;
            while let Some(delivery) = client.rx.recv().await {
                let message = match delivery {
                    Delivery::Event(event) => SocketServerMessage::Event(event),
                    Delivery::Chunk(chunk) => SocketServerMessage::LogChunk(chunk),
                };
                if send_message(writer, message).await.is_err() {
                    break;
                }
            }
            engine.detach(client.id).await
        }
    }
}

async fn handle_client(engine: Engine, stream: UnixStream) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    match serde_json::from_str::<SocketClientMessage>(line.trim_end()) {
        Ok(message) => {
            if let Err(err) = handle_message(&mut writer, message, &engine).await {
                error!("error during socket message handling - {err}");
                send_message(&mut writer, SocketServerMessage::Error(err.to_string())).await?;
                return Err(err);
            }
            Ok(())
        }
        Err(_) => {
            warn!("failed to parse socket message: {line}");
            Ok(())
        }
    }
}

/// Where the listener binds. `unix:PATH` binds a path socket; the abstract
/// namespace of the default `unix-abstract:NAME` is not portable, so it
/// falls back to a path socket under the laminar home.
fn socket_path(settings: &Settings) -> PathBuf {
    match settings.bind_rpc.split_once(':') {
        Some(("unix", path)) => PathBuf::from(path),
        Some(("unix-abstract", name)) => {
            warn!("abstract socket namespace not supported, binding a path socket");
            settings.home.join(format!("{name}.sock"))
        }
        _ => settings.home.join("laminar.sock"),
    }
}

/// Bind the socket and start accepting connections.
pub async fn setup_socket(settings: &Settings, engine: Engine) -> Result<JoinHandle<()>> {
    let path = socket_path(settings);
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    info!(path = %path.display(), "socket listening");

    let handler = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_client(engine, stream).await {
                            error!("error handling socket client: {err}");
                        }
                    });
                }
                Err(err) => {
                    error!("failed to accept socket connection: {err}");
                }
            }
        }
    });
    Ok(handler)
}
