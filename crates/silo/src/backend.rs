//! Backend selection and wiring
//!
//! Callers pick a backend through [`BackendConfig`] (deserializable, so it
//! can come straight out of a config file) and get back a ready-to-use
//! [`WithEvents`] repository from [`open`]. [`BackendHandle`] is the closed
//! enum over the shipped backends; code that needs to stay generic should
//! take `impl Repository` instead of matching on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use silo_api::{Constraints, Result, Row};
use std::path::PathBuf;

use crate::api::memory_backend::MemoryBackend;
use crate::api::repository::Repository;
use crate::core::with_events::WithEvents;
use crate::storage::sqlite::SqliteBackend;

/// Which backend to open.
///
/// Serialized form is externally tagged:
///
/// ```json
/// "memory"
/// { "sqlite": { "path": "/var/lib/app/data.db" } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendConfig {
    /// Process-local store, lost on shutdown.
    #[default]
    Memory,
    /// SQLite file at `path`, or a private in-memory database when `path` is
    /// `None`.
    Sqlite { path: Option<PathBuf> },
}

/// One of the shipped backends, behind a single concrete type.
#[derive(Clone, Debug)]
pub enum BackendHandle {
    Memory(MemoryBackend),
    Sqlite(SqliteBackend),
}

/// Open the configured backend, wrapped in the event decorator.
///
/// # Example
///
/// ```rust,no_run
/// use silo::{open, BackendConfig};
///
/// # fn example() -> silo::Result<()> {
/// let repo = open(&BackendConfig::Sqlite {
///     path: Some("/var/lib/app/data.db".into()),
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn open(config: &BackendConfig) -> Result<WithEvents<BackendHandle>> {
    let handle = match config {
        BackendConfig::Memory => BackendHandle::Memory(MemoryBackend::new()),
        BackendConfig::Sqlite { path: Some(path) } => {
            BackendHandle::Sqlite(SqliteBackend::open(path)?)
        }
        BackendConfig::Sqlite { path: None } => {
            BackendHandle::Sqlite(SqliteBackend::open_in_memory()?)
        }
    };
    Ok(WithEvents::new(handle))
}

#[async_trait]
impl Repository for BackendHandle {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Row>> {
        match self {
            BackendHandle::Memory(b) => b.find(table, id).await,
            BackendHandle::Sqlite(b) => b.find(table, id).await,
        }
    }

    async fn query(
        &self,
        table: &str,
        constraints: Constraints,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Row>> {
        match self {
            BackendHandle::Memory(b) => b.query(table, constraints, fields).await,
            BackendHandle::Sqlite(b) => b.query(table, constraints, fields).await,
        }
    }

    async fn query_count(&self, table: &str, constraints: Constraints) -> Result<usize> {
        match self {
            BackendHandle::Memory(b) => b.query_count(table, constraints).await,
            BackendHandle::Sqlite(b) => b.query_count(table, constraints).await,
        }
    }

    async fn create(&self, table: &str, data: Row, id: Option<String>) -> Result<String> {
        match self {
            BackendHandle::Memory(b) => b.create(table, data, id).await,
            BackendHandle::Sqlite(b) => b.create(table, data, id).await,
        }
    }

    async fn bulk_create(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        match self {
            BackendHandle::Memory(b) => b.bulk_create(table, rows).await,
            BackendHandle::Sqlite(b) => b.bulk_create(table, rows).await,
        }
    }

    async fn update(&self, table: &str, id: &str, data: Row) -> Result<()> {
        match self {
            BackendHandle::Memory(b) => b.update(table, id, data).await,
            BackendHandle::Sqlite(b) => b.update(table, id, data).await,
        }
    }

    async fn bulk_update(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        match self {
            BackendHandle::Memory(b) => b.bulk_update(table, rows).await,
            BackendHandle::Sqlite(b) => b.bulk_update(table, rows).await,
        }
    }

    async fn remove(&self, table: &str, id: &str) -> Result<()> {
        match self {
            BackendHandle::Memory(b) => b.remove(table, id).await,
            BackendHandle::Sqlite(b) => b.remove(table, id).await,
        }
    }

    async fn bulk_remove(&self, table: &str, ids: Vec<String>) -> Result<()> {
        match self {
            BackendHandle::Memory(b) => b.bulk_remove(table, ids).await,
            BackendHandle::Sqlite(b) => b.bulk_remove(table, ids).await,
        }
    }
}
