//! In-memory node and job-tag maps, refreshed from disk on demand.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{info, warn};

use crate::conf_file::ConfFile;
use crate::node::{Node, DEFAULT_EXECUTORS};
use crate::settings::Settings;

/// Node and per-job tag configuration.
///
/// `load` may be called repeatedly, on startup and whenever a filesystem
/// watcher reports that the `cfg/` tree changed.
#[derive(Debug, Default)]
pub struct Configuration {
    /// Nodes keyed by name; iteration is in name order, which is the order
    /// the dispatcher walks them.
    pub nodes: BTreeMap<String, Node>,
    pub job_tags: HashMap<String, BTreeSet<String>>,
    pub keep_run_dirs: u32,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reload nodes and job tags from the `cfg/` tree.
    ///
    /// Existing nodes are updated in place so their busy-executor counts
    /// survive a reload. Nodes whose config file disappeared are removed,
    /// except the nameless default node, which is preserved as long as no
    /// nodes are configured at all.
    pub fn load(&mut self, settings: &Settings) {
        self.keep_run_dirs = std::env::var("LAMINAR_KEEP_RUNDIRS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(settings.keep_run_dirs);

        let mut known = BTreeSet::new();
        for path in conf_files(&settings.nodes_dir()) {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let conf = match ConfFile::load(&path) {
                Ok(conf) => conf,
                Err(err) => {
                    warn!(path = %path.display(), "skipping unreadable node config: {err}");
                    continue;
                }
            };
            let node = self
                .nodes
                .entry(stem.to_string())
                .or_insert_with(|| Node::new(stem));
            node.num_executors = conf.get_u32("EXECUTORS", DEFAULT_EXECUTORS);
            let tags = conf.get_tags("TAGS");
            if !tags.is_empty() {
                node.tags = tags;
            }
            known.insert(stem.to_string());
        }

        // Drop nodes whose config files disappeared; the default node stays
        // when the reload also produced no nodes.
        self.nodes
            .retain(|name, _| (name.is_empty() && known.is_empty()) || known.contains(name));

        if self.nodes.is_empty() {
            info!("no nodes configured, adding default node");
            self.nodes.insert(String::new(), Node::new(""));
        }

        for path in conf_files(&settings.jobs_dir()) {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let conf = match ConfFile::load(&path) {
                Ok(conf) => conf,
                Err(err) => {
                    warn!(path = %path.display(), "skipping unreadable job config: {err}");
                    continue;
                }
            };
            let tags = conf.get_tags("TAGS");
            if !tags.is_empty() {
                self.job_tags.insert(stem.to_string(), tags);
            }
        }
    }
}

fn conf_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn home_with(files: &[(&str, &str)]) -> (TempDir, Settings) {
        let dir = TempDir::new().unwrap();
        let settings = Settings::for_home(dir.path());
        std::fs::create_dir_all(settings.nodes_dir()).unwrap();
        std::fs::create_dir_all(settings.jobs_dir()).unwrap();
        for (rel, content) in files {
            std::fs::write(settings.cfg_dir().join(rel), content).unwrap();
        }
        (dir, settings)
    }

    #[test]
    fn default_node_when_nothing_configured() {
        let (_dir, settings) = home_with(&[]);
        let mut config = Configuration::new();
        config.load(&settings);
        assert_eq!(config.nodes.len(), 1);
        let node = &config.nodes[""];
        assert_eq!(node.num_executors, DEFAULT_EXECUTORS);
        assert!(node.tags.is_empty());
    }

    #[test]
    fn nodes_parsed_from_conf_files() {
        let (_dir, settings) = home_with(&[
            ("nodes/big.conf", "EXECUTORS=12\nTAGS=linux,fast\n"),
            ("nodes/small.conf", ""),
        ]);
        let mut config = Configuration::new();
        config.load(&settings);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes["big"].num_executors, 12);
        assert_eq!(config.nodes["big"].tags.len(), 2);
        assert_eq!(config.nodes["small"].num_executors, DEFAULT_EXECUTORS);
        // the default node is not inserted alongside configured ones
        assert!(!config.nodes.contains_key(""));
    }

    #[test]
    fn reload_preserves_busy_executors() {
        let (_dir, settings) = home_with(&[("nodes/a.conf", "EXECUTORS=2\n")]);
        let mut config = Configuration::new();
        config.load(&settings);
        config.nodes.get_mut("a").unwrap().busy_executors = 1;

        std::fs::write(settings.cfg_dir().join("nodes/a.conf"), "EXECUTORS=4\n").unwrap();
        config.load(&settings);
        let node = &config.nodes["a"];
        assert_eq!(node.num_executors, 4);
        assert_eq!(node.busy_executors, 1);
    }

    #[test]
    fn removed_nodes_disappear_and_default_returns() {
        let (_dir, settings) = home_with(&[("nodes/a.conf", "")]);
        let mut config = Configuration::new();
        config.load(&settings);
        assert!(config.nodes.contains_key("a"));

        std::fs::remove_file(settings.cfg_dir().join("nodes/a.conf")).unwrap();
        config.load(&settings);
        assert!(!config.nodes.contains_key("a"));
        assert!(config.nodes.contains_key(""));

        // a second reload with no nodes must not remove and re-add the default
        config.nodes.get_mut("").unwrap().busy_executors = 1;
        config.load(&settings);
        assert_eq!(config.nodes[""].busy_executors, 1);
    }

    #[test]
    fn job_tags_recorded() {
        let (_dir, settings) = home_with(&[
            ("jobs/build.conf", "TAGS=linux\nTIMEOUT=60\n"),
            ("jobs/untagged.conf", "TIMEOUT=5\n"),
        ]);
        let mut config = Configuration::new();
        config.load(&settings);
        assert_eq!(config.job_tags["build"], BTreeSet::from(["linux".to_string()]));
        assert!(!config.job_tags.contains_key("untagged"));
    }
}
