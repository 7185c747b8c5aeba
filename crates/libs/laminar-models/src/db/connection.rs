//! Database connection management and migrations.

use diesel::r2d2::ConnectionManager;
use diesel::r2d2::Pool;
use diesel::SqliteConnection;
use diesel_migrations::embed_migrations;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use tracing::info;

use super::config::DbConfig;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// SQLite connection pool wrapper.
///
/// The engine loop is the only writer, so the pool holds a single
/// connection. That also keeps an in-memory database alive for its
/// whole lifetime.
#[derive(Clone)]
pub struct DbConnection {
    pub pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl DbConnection {
    /// Open (creating if necessary) the build database.
    pub fn new(config: &DbConfig) -> Self {
        let manager =
            ConnectionManager::<SqliteConnection>::new(config.database_path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Couldn't open the build database");
        Self { pool }
    }

    /// Run database migrations and return the configured connection.
    ///
    /// The migrations use `CREATE TABLE IF NOT EXISTS`, so running them
    /// against an existing database is harmless.
    pub fn setup(self) -> Self {
        info!("Running database migrations");
        self.pool
            .get()
            .expect("Couldn't get a connection from the pool to run migrations")
            .run_pending_migrations(MIGRATIONS)
            .expect("Failed to run database migrations");
        self
    }
}
