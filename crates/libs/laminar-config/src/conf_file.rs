//! Key-value configuration file parsing.
//!
//! Node and job configuration files, as well as env files, are plain
//! `KEY=VALUE` lines. Blank lines and `#` comments are ignored; lines
//! without a `=` are skipped.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::prelude::*;

/// A parsed key-value configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfFile {
    values: HashMap<String, String>,
}

impl ConfFile {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse configuration from a string.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Integer value for `key`, or `default` when missing or unparsable.
    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Comma-separated set value for `key`. Missing keys yield an empty set.
    pub fn get_tags(&self, key: &str) -> BTreeSet<String> {
        self.get_str(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All entries, for use as a process environment.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let conf = ConfFile::parse("EXECUTORS=4\nTAGS=linux, arm64\n");
        assert_eq!(conf.get_u32("EXECUTORS", 6), 4);
        assert_eq!(
            conf.get_tags("TAGS"),
            BTreeSet::from(["linux".to_string(), "arm64".to_string()])
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let conf = ConfFile::parse("# a comment\n\nTIMEOUT=30\nnot a setting\n");
        assert_eq!(conf.get_u32("TIMEOUT", 0), 30);
        assert_eq!(conf.get_str("not a setting"), None);
    }

    #[test]
    fn defaults_apply_on_missing_or_bad_values() {
        let conf = ConfFile::parse("EXECUTORS=lots\n");
        assert_eq!(conf.get_u32("EXECUTORS", 6), 6);
        assert_eq!(conf.get_u32("TIMEOUT", 0), 0);
        assert!(conf.get_tags("TAGS").is_empty());
    }

    #[test]
    fn values_may_contain_equals() {
        let conf = ConfFile::parse("FLAGS=-DFOO=1 -DBAR=2\n");
        assert_eq!(conf.get_str("FLAGS"), Some("-DFOO=1 -DBAR=2"));
    }
}
