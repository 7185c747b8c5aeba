//! Service settings resolved from the environment, and the on-disk layout.

use std::path::PathBuf;

/// Settings read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of `cfg/`, `run/`, `archive/`, `custom/` and the database.
    pub home: PathBuf,
    /// URL prefix for artifact links.
    pub archive_url: String,
    /// Display title in status documents.
    pub title: String,
    pub bind_rpc: String,
    pub bind_http: String,
    /// Run-directory retention count; 0 disables pruning.
    pub keep_run_dirs: u32,
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            home: PathBuf::from(env_or("LAMINAR_HOME", "/var/lib/laminar")),
            archive_url: env_or("LAMINAR_ARCHIVE_URL", "/archive"),
            title: env_or("LAMINAR_TITLE", "Laminar"),
            bind_rpc: env_or("LAMINAR_BIND_RPC", "unix-abstract:laminar"),
            bind_http: env_or("LAMINAR_BIND_HTTP", "*:8080"),
            keep_run_dirs: env_or("LAMINAR_KEEP_RUNDIRS", "0").parse().unwrap_or(0),
        }
    }

    /// Defaults rooted at `home`; environment variables are not consulted.
    pub fn for_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            archive_url: "/archive".into(),
            title: "Laminar".into(),
            bind_rpc: "unix-abstract:laminar".into(),
            bind_http: "*:8080".into(),
            keep_run_dirs: 0,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.home.join("laminar.sqlite")
    }

    pub fn cfg_dir(&self) -> PathBuf {
        self.home.join("cfg")
    }

    pub fn nodes_dir(&self) -> PathBuf {
        self.cfg_dir().join("nodes")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.cfg_dir().join("jobs")
    }

    /// `cfg/jobs/{job}.{ext}`: the per-job scripts and config.
    pub fn job_file(&self, job: &str, ext: &str) -> PathBuf {
        self.jobs_dir().join(format!("{job}.{ext}"))
    }

    /// `cfg/nodes/{node}.{ext}`: the per-node scripts and config.
    pub fn node_file(&self, node: &str, ext: &str) -> PathBuf {
        self.nodes_dir().join(format!("{node}.{ext}"))
    }

    /// Persistent per-job workspace, preserved across builds.
    pub fn workspace_dir(&self, job: &str) -> PathBuf {
        self.home.join("run").join(job).join("workspace")
    }

    /// Per-build working directory, eligible for pruning.
    pub fn build_dir(&self, job: &str, number: u32) -> PathBuf {
        self.home.join("run").join(job).join(number.to_string())
    }

    pub fn archive_root(&self) -> PathBuf {
        self.home.join("archive")
    }

    /// Per-build directory of preserved outputs.
    pub fn archive_dir(&self, job: &str, number: u32) -> PathBuf {
        self.archive_root().join(job).join(number.to_string())
    }

    pub fn custom_css_path(&self) -> PathBuf {
        self.home.join("custom").join("style.css")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_hangs_off_home() {
        let settings = Settings::for_home("/tmp/ci");
        assert_eq!(settings.database_path(), PathBuf::from("/tmp/ci/laminar.sqlite"));
        assert_eq!(settings.job_file("hello", "run"), PathBuf::from("/tmp/ci/cfg/jobs/hello.run"));
        assert_eq!(settings.node_file("a", "env"), PathBuf::from("/tmp/ci/cfg/nodes/a.env"));
        assert_eq!(settings.workspace_dir("hello"), PathBuf::from("/tmp/ci/run/hello/workspace"));
        assert_eq!(settings.build_dir("hello", 3), PathBuf::from("/tmp/ci/run/hello/3"));
        assert_eq!(settings.archive_dir("hello", 3), PathBuf::from("/tmp/ci/archive/hello/3"));
    }
}
