//! Runtime orchestrator: drives one invocation end to end.
//!
//! Authenticate, pull, ingest, then write the run log on every exit path.

pub mod orchestrator;
pub mod types;

pub use orchestrator::Orchestrator;
pub use types::*;
