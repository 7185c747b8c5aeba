//! Configuration model for the laminar engine.
//!
//! Provides the service settings resolved from the environment, the
//! key-value config-file parser, and the in-memory node and job-tag maps
//! that are refreshed from the `cfg/` tree on demand.

pub mod conf_file;
pub mod error;
pub mod model;
pub mod node;
pub mod prelude;
pub mod settings;

pub use conf_file::ConfFile;
pub use model::Configuration;
pub use node::Node;
pub use settings::Settings;
