//! Durable bot state for pilot.
//!
//! Owns the single `BotState` record:
//! - Loaded once at startup, falling back to a default record when the
//!   persisted document is unreadable
//! - Mutated only through a serialized read-modify-write-persist cycle
//! - Readable at any time through a consistent snapshot

pub mod error;
pub mod store;

pub use error::{StateError, StateResult};
pub use store::{LoadOutcome, StateGuard, StateStore};
