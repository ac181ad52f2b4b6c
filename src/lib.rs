pub mod backend;
pub mod config;
pub mod dispatch_log;
pub mod error;
pub mod format;
pub mod orchestrator;
pub mod persistence;
pub mod presence;
pub mod reconnect;
pub mod rotation;
pub mod state;
pub mod store;
pub mod timer;
pub mod transport;
pub mod types;

pub use orchestrator::{Action, Collaborators, Notice, Orchestrator, OrchestratorHandle};
pub use state::AppState;
