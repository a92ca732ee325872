//! Mirroring infrastructure
//!
//! - `search_index`: external search index contract and the event-listener
//!   glue that keeps an index in step with a repository

pub mod search_index;

pub use search_index::*;
