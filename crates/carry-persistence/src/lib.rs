//! File-backed persistence for the carry bot.
//!
//! Open positions and the blacklist are JSON documents rewritten atomically;
//! closed positions are appended as JSON Lines so an interrupted write only
//! affects its own line.

pub mod error;
pub mod json_store;

pub use error::{PersistenceError, PersistenceResult};
pub use json_store::JsonStore;
