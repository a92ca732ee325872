//! Backend-agnostic repository API
//!
//! This module defines the repository contract every backend implements,
//! the in-memory reference backend, and the typed convenience layer.
//!
//! # Architecture
//!
//! - `repository`: the `Repository` trait defining the CRUD contract
//! - `memory_backend`: HashMap-based reference implementation
//! - `typed`: serde-backed typed view over a single table
//!
//! # Design Principles
//!
//! - Backend-agnostic: callers never see SQL, file handles or sockets
//! - Absence is not an error: lookups resolve to `None`/empty, never `Err`
//! - Async-first: all operations return Futures for flexibility

pub mod memory_backend;
pub mod repository;
pub mod typed;

#[cfg(test)]
mod memory_pbt;

// Re-export commonly used types
pub use memory_backend::MemoryBackend;
pub use repository::Repository;
pub use typed::{Entity, TypedTable};

pub use silo_api::{
    Constraints, Direction, EventKind, Filter, Operator, RepoError, Result, Row, Value, ID_FIELD,
    ID_PATH,
};
