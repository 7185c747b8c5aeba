#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use laminar_config::Settings;
use laminar_models::db::{config::DbConfig, connection::DbConnection};
use laminard::engine::{Delivery, Engine};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// A throwaway laminar home with helpers for writing jobs and nodes.
pub struct TestHome {
    pub dir: TempDir,
    pub settings: Settings,
}

impl TestHome {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp home");
        let settings = Settings::for_home(dir.path());
        std::fs::create_dir_all(settings.jobs_dir()).unwrap();
        std::fs::create_dir_all(settings.nodes_dir()).unwrap();
        Self { dir, settings }
    }

    /// Write an executable job script: `cfg/jobs/{job}.{ext}`.
    pub fn write_script(&self, job: &str, ext: &str, body: &str) {
        let path = self.settings.job_file(job, ext);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    pub fn write_job_conf(&self, job: &str, content: &str) {
        std::fs::write(self.settings.job_file(job, "conf"), content).unwrap();
    }

    pub fn write_node_conf(&self, node: &str, content: &str) {
        std::fs::write(self.settings.node_file(node, "conf"), content).unwrap();
    }

    /// A fresh connection to the engine's database, for assertions.
    pub fn db(&self) -> DbConnection {
        DbConnection::new(&DbConfig::new(self.settings.database_path())).setup()
    }

    pub fn engine(&self) -> (Engine, JoinHandle<()>) {
        Engine::create(self.settings.clone(), self.db()).unwrap()
    }
}

/// Receive the next client delivery, failing the test on a stuck channel.
pub async fn recv_delivery(rx: &mut UnboundedReceiver<Delivery>) -> Delivery {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for client delivery")
        .expect("client channel closed")
}
