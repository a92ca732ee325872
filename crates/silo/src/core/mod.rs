//! Cross-cutting repository layers.
//!
//! Layers wrap any [`crate::Repository`] and add behavior without the
//! backend knowing; they compose by nesting.

pub mod with_events;

pub use with_events::WithEvents;
