//! Persistence layer for the laminar engine.
//!
//! Diesel-based build-history store over a local SQLite database, plus the
//! codec applied to large run logs on their way in and out of the `builds`
//! table.

pub mod build;
pub mod db;
pub mod error;
pub mod logcodec;
pub mod prelude;
mod schema;
