pub mod api;
pub mod backend;
pub mod core;
pub mod storage;
pub mod sync;

// Re-export the contract types so callers only need the silo crate
pub use silo_api::{
    Constraints, Direction, EventKind, Filter, ListenerId, Operator, RepoError, Result, Row, Value,
    ID_FIELD, ID_PATH,
};

pub use api::memory_backend::MemoryBackend;
pub use api::repository::Repository;
pub use api::typed::{Entity, TypedTable};
pub use backend::{BackendConfig, BackendHandle, open};
pub use core::with_events::WithEvents;
pub use storage::sqlite::SqliteBackend;
