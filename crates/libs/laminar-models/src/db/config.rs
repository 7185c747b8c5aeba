//! Database configuration.

use std::path::PathBuf;

/// Location of the build database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_path: PathBuf,
}

impl DbConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self { database_path: database_path.into() }
    }

    /// An in-memory database, for tests.
    pub fn in_memory() -> Self {
        Self { database_path: PathBuf::from(":memory:") }
    }
}
