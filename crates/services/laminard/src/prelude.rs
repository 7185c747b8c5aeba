//! Common types and utilities.

/// Engine service error type.
pub use crate::error::Error;

/// Engine service result type.
pub type Result<T> = core::result::Result<T, Error>;
