//! laminard, a lightweight continuous-integration service.
//!
//! A single-instance engine that accepts job-run requests, queues them,
//! dispatches them to tagged executor nodes, supervises the per-job script
//! sequences, streams their output to subscribed clients and persists every
//! outcome. It provides:
//!
//! - **Engine loop**: queue admission, node/tag matching and run lifecycle
//! - **Unix socket**: local RPC for queueing, waiting, aborting and status
//! - **Build history**: SQLite-backed store of completed runs
//!
//! Everything is configured through `LAMINAR_*` environment variables; the
//! `cfg/` tree under `LAMINAR_HOME` defines nodes and jobs.

use laminar_config::Settings;
use laminar_models::db::{config::DbConfig, connection::DbConnection};
use laminard::engine::Engine;
use laminard::prelude::*;
use laminard::socket::setup_socket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    std::fs::create_dir_all(&settings.home)?;

    let db = DbConnection::new(&DbConfig::new(settings.database_path())).setup();
    let (engine, engine_handle) = Engine::create(settings.clone(), db)?;
    let socket_handle = setup_socket(&settings, engine.clone()).await?;

    tokio::select! {
        result = engine_handle => {
            tracing::error!("Engine task stopped: {:?}", result);
        }
        result = socket_handle => {
            tracing::error!("Socket task stopped: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            engine.abort_all().await?;
        }
    }

    Ok(())
}
