//! Shared protocol types for the laminar engine.
//!
//! Defines the vocabulary spoken between the engine core, its socket
//! front-end and connected clients: run lifecycle states, monitor scopes,
//! the JSON messages broadcast on client channels and the unix-socket
//! message envelopes.

pub mod event;
pub mod run_state;
pub mod scope;
pub mod socket_message;

pub use run_state::RunState;
pub use scope::MonitorScope;
