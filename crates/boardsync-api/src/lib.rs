//! Incident board API client.
//!
//! Authentication yields an explicit [`Session`] handle that the data pull
//! borrows; nothing about the session outlives one invocation.

pub mod board;
pub mod session;

pub use board::BoardTarget;
pub use session::{ApiSession, Session};
