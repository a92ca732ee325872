//! Repository trait and the CRUD contract
//!
//! This module defines the backend-agnostic repository interface. All
//! backends (in-memory, SQLite, future remote stores) implement this trait,
//! and callers program against it without knowing which one they hold.
//!
//! # Contract
//!
//! A repository is parameterized at the call site by a table name. Rows are
//! schema-free [`Row`] maps whose identifier lives under [`ID_FIELD`]
//! (`silo_api::ID_FIELD`). Two rules hold for every backend:
//!
//! - **Absence is not an error.** `find` on a missing id resolves to
//!   `Ok(None)`, queries on unknown tables resolve to empty vectors, and
//!   removing a missing id is a no-op. `Err` means the backend itself failed.
//! - **Updates merge.** `update` overlays the payload onto the stored row;
//!   fields not named in the payload survive, and fields set to
//!   [`Value::Delete`] are dropped from the row.
//!
//! # Example
//!
//! ```rust,no_run
//! use silo::{Constraints, Operator, Repository, Row, Value};
//!
//! async fn example(repo: impl Repository) -> anyhow::Result<()> {
//!     let mut task = Row::new();
//!     task.insert("title".to_string(), Value::String("write docs".to_string()));
//!     task.insert("done".to_string(), Value::Boolean(false));
//!
//!     let id = repo.create("tasks", task, None).await?;
//!
//!     let open = repo
//!         .query(
//!             "tasks",
//!             Constraints::new().filter("done", Operator::Eq, false),
//!             None,
//!         )
//!         .await?;
//!     assert_eq!(open.len(), 1);
//!
//!     repo.remove("tasks", &id).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use silo_api::{Constraints, Result, Row};

/// Backend-agnostic CRUD operations over named tables.
///
/// Implementations must be cheap to clone or share behind `Arc`; all methods
/// take `&self` so a single instance can serve concurrent callers.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch a single row by id.
    ///
    /// # Returns
    ///
    /// `Some(row)` with the id included under [`silo_api::ID_FIELD`], or
    /// `None` when the table or id does not exist. An empty id resolves to
    /// `None` without touching the backend.
    async fn find(&self, table: &str, id: &str) -> Result<Option<Row>>;

    /// Fetch all rows matching the constraints.
    ///
    /// Filters are ANDed, then ordering is applied, then the limit. With no
    /// `order_by` the backend's insertion order is preserved. When `fields`
    /// is given, each returned row is projected to exactly those fields; the
    /// id is an ordinary key here, returned only when requested. Requested
    /// fields a row does not carry are simply absent.
    ///
    /// # Returns
    ///
    /// Matching rows, possibly empty. Unknown tables are empty, not errors.
    async fn query(
        &self,
        table: &str,
        constraints: Constraints,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Row>>;

    /// Count rows matching the constraints without fetching them.
    ///
    /// Only the filters apply. Ordering and limit are fetch concerns, so a
    /// limited `query` can return fewer rows than this reports.
    async fn query_count(&self, table: &str, constraints: Constraints) -> Result<usize>;

    /// Insert a new row.
    ///
    /// # Arguments
    ///
    /// * `data` - Field values; any id field inside is superseded by `id`
    /// * `id` - Explicit identifier (None = backend-generated)
    ///
    /// # Returns
    ///
    /// The id under which the row was stored.
    async fn create(&self, table: &str, data: Row, id: Option<String>) -> Result<String>;

    /// Insert many rows in one call.
    ///
    /// Rows may carry their own id under [`silo_api::ID_FIELD`]; rows without
    /// one get a generated id. Backends are free to chunk large batches.
    ///
    /// # Returns
    ///
    /// The created rows in input order, each including its assigned id.
    async fn bulk_create(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>>;

    /// Merge `data` into the row with the given id.
    ///
    /// Fields present in `data` replace stored fields, fields absent from
    /// `data` are untouched, and fields set to [`silo_api::Value::Delete`]
    /// are removed. Updating a missing id is a no-op.
    async fn update(&self, table: &str, id: &str, data: Row) -> Result<()>;

    /// Merge many partial rows in one call.
    ///
    /// Each row must carry its target id under [`silo_api::ID_FIELD`].
    ///
    /// # Errors
    ///
    /// Returns [`silo_api::RepoError::MissingId`] if any row lacks an id.
    async fn bulk_update(&self, table: &str, rows: Vec<Row>) -> Result<()>;

    /// Delete the row with the given id. Missing ids are a no-op.
    async fn remove(&self, table: &str, id: &str) -> Result<()>;

    /// Delete many rows by id. Missing ids are skipped, the rest are deleted.
    async fn bulk_remove(&self, table: &str, ids: Vec<String>) -> Result<()>;
}

/// Shared handles delegate to the underlying repository, so `Arc<B>` can be
/// passed wherever an owned backend is expected.
#[async_trait]
impl<R> Repository for std::sync::Arc<R>
where
    R: Repository + ?Sized,
{
    async fn find(&self, table: &str, id: &str) -> Result<Option<Row>> {
        (**self).find(table, id).await
    }

    async fn query(
        &self,
        table: &str,
        constraints: Constraints,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Row>> {
        (**self).query(table, constraints, fields).await
    }

    async fn query_count(&self, table: &str, constraints: Constraints) -> Result<usize> {
        (**self).query_count(table, constraints).await
    }

    async fn create(&self, table: &str, data: Row, id: Option<String>) -> Result<String> {
        (**self).create(table, data, id).await
    }

    async fn bulk_create(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        (**self).bulk_create(table, rows).await
    }

    async fn update(&self, table: &str, id: &str, data: Row) -> Result<()> {
        (**self).update(table, id, data).await
    }

    async fn bulk_update(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        (**self).bulk_update(table, rows).await
    }

    async fn remove(&self, table: &str, id: &str) -> Result<()> {
        (**self).remove(table, id).await
    }

    async fn bulk_remove(&self, table: &str, ids: Vec<String>) -> Result<()> {
        (**self).bulk_remove(table, ids).await
    }
}
