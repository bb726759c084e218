//! Sync service: the long-poll loop and the values it produces.

pub(crate) mod engine;
pub(crate) mod state;

pub use state::{ConfigChange, InitOutcome, PollOutcome};
