//! Typed view over a single repository table
//!
//! Repositories traffic in schema-free [`Row`] maps. This module layers a
//! serde round trip on top so callers can work with their own structs:
//! implement [`Entity`] (one associated const naming the table) and wrap any
//! backend in a [`TypedTable`].
//!
//! The conversion is plain serde, so the usual attributes (`rename`,
//! `default`, `skip_serializing_if`) shape the stored row. Fields the struct
//! does not know about are ignored on read and left untouched on
//! [`TypedTable::save`], which merges like [`Repository::update`] does.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use silo_api::{Constraints, RepoError, Result, Row, Value, ID_FIELD};

use crate::api::repository::Repository;

/// A struct bound to a repository table.
///
/// The provided `to_row`/`from_row` conversions go through `serde_json`, so
/// the type must serialize to a JSON object.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Table the entity is stored in.
    const TABLE: &'static str;

    /// Serialize into the row representation.
    ///
    /// # Errors
    ///
    /// [`RepoError::Serialization`] when the type does not serialize to an
    /// object (for example a newtype over a scalar).
    fn to_row(&self) -> Result<Row> {
        let json = serde_json::to_value(self)?;
        match Value::from_json_value(json) {
            Value::Object(row) => Ok(row),
            other => Err(RepoError::Serialization(format!(
                "entity for table '{}' must serialize to an object, got {:?}",
                Self::TABLE,
                other
            ))),
        }
    }

    /// Deserialize from the row representation.
    ///
    /// Row fields the type does not declare (including the id, unless the
    /// type has an `id` field) are ignored.
    fn from_row(row: Row) -> Result<Self> {
        let json: serde_json::Value = Value::Object(row).into();
        Ok(serde_json::from_value(json)?)
    }
}

/// Typed access to one table of a repository.
///
/// Thin wrapper: every method converts through [`Entity`] and delegates to
/// the underlying [`Repository`], so the semantics (merge updates, absence as
/// `None`, insertion-order queries) are exactly the backend's.
///
/// # Example
///
/// ```rust,no_run
/// use serde::{Deserialize, Serialize};
/// use silo::{Constraints, Entity, MemoryBackend, Operator, TypedTable};
///
/// #[derive(Serialize, Deserialize)]
/// struct Task {
///     title: String,
///     done: bool,
/// }
///
/// impl Entity for Task {
///     const TABLE: &'static str = "tasks";
/// }
///
/// async fn example() -> anyhow::Result<()> {
///     let tasks: TypedTable<Task, _> = TypedTable::new(MemoryBackend::new());
///     let id = tasks
///         .create(
///             &Task {
///                 title: "write docs".into(),
///                 done: false,
///             },
///             None,
///         )
///         .await?;
///
///     let open = tasks
///         .query(Constraints::new().filter("done", Operator::Eq, false))
///         .await?;
///     assert_eq!(open.len(), 1);
///
///     tasks.remove(&id).await?;
///     Ok(())
/// }
/// ```
pub struct TypedTable<T, R> {
    repo: R,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R: Clone> Clone for TypedTable<T, R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T, R> TypedTable<T, R>
where
    T: Entity,
    R: Repository,
{
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            _entity: PhantomData,
        }
    }

    /// The wrapped backend, for raw-row operations the typed surface does not
    /// cover.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Fetch and deserialize a single entity, `None` when the id is unknown.
    pub async fn find(&self, id: &str) -> Result<Option<T>> {
        match self.repo.find(T::TABLE, id).await? {
            Some(row) => Ok(Some(T::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Fetch all entities matching the constraints.
    pub async fn query(&self, constraints: Constraints) -> Result<Vec<T>> {
        self.repo
            .query(T::TABLE, constraints, None)
            .await?
            .into_iter()
            .map(T::from_row)
            .collect()
    }

    /// Count entities matching the constraints without fetching them.
    pub async fn query_count(&self, constraints: Constraints) -> Result<usize> {
        self.repo.query_count(T::TABLE, constraints).await
    }

    /// Insert an entity, returning its id.
    pub async fn create(&self, entity: &T, id: Option<String>) -> Result<String> {
        self.repo.create(T::TABLE, entity.to_row()?, id).await
    }

    /// Insert many entities in one call, returning their ids in input order.
    pub async fn bulk_create(&self, entities: &[T]) -> Result<Vec<String>> {
        let rows = entities
            .iter()
            .map(Entity::to_row)
            .collect::<Result<Vec<_>>>()?;
        let created = self.repo.bulk_create(T::TABLE, rows).await?;
        created
            .into_iter()
            .map(|row| {
                row.get(ID_FIELD)
                    .and_then(|v| v.as_string().map(String::from))
                    .ok_or_else(|| RepoError::MissingId {
                        table: T::TABLE.to_string(),
                    })
            })
            .collect()
    }

    /// Merge the full serialized entity over the stored row.
    ///
    /// Fields the serialization omits (serde `skip_serializing_if`, flattened
    /// extras written by other callers) keep their stored values.
    pub async fn save(&self, id: &str, entity: &T) -> Result<()> {
        self.repo.update(T::TABLE, id, entity.to_row()?).await
    }

    /// Merge a raw partial row, for field deletes via [`Value::Delete`] and
    /// other updates the typed surface cannot express.
    pub async fn patch(&self, id: &str, data: Row) -> Result<()> {
        self.repo.update(T::TABLE, id, data).await
    }

    /// Delete by id. Missing ids are a no-op.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.repo.remove(T::TABLE, id).await
    }

    /// Delete many ids in one call.
    pub async fn bulk_remove(&self, ids: Vec<String>) -> Result<()> {
        self.repo.bulk_remove(T::TABLE, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory_backend::MemoryBackend;
    use serde::Deserialize;
    use silo_api::Operator;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Contact {
        name: String,
        age: i64,
    }

    impl Entity for Contact {
        const TABLE: &'static str = "contacts";
    }

    #[derive(Serialize, Deserialize)]
    struct Plain(String);

    impl Entity for Plain {
        const TABLE: &'static str = "plain";
    }

    fn contacts() -> TypedTable<Contact, MemoryBackend> {
        TypedTable::new(MemoryBackend::new())
    }

    fn jane() -> Contact {
        Contact {
            name: "Jane".to_string(),
            age: 27,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_round_trip() {
        let table = contacts();
        let id = table.create(&jane(), None).await.unwrap();

        let found = table.find(&id).await.unwrap().unwrap();
        assert_eq!(found, jane());
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let table = contacts();
        assert!(table.find("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_deserializes_matches() {
        let table = contacts();
        table.create(&jane(), None).await.unwrap();
        table
            .create(
                &Contact {
                    name: "John".to_string(),
                    age: 41,
                },
                None,
            )
            .await
            .unwrap();

        let young = table
            .query(Constraints::new().filter("age", Operator::Lt, 30))
            .await
            .unwrap();
        assert_eq!(young, vec![jane()]);

        let count = table.query_count(Constraints::new()).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_save_merges_over_stored_row() {
        let table = contacts();
        let id = table.create(&jane(), None).await.unwrap();

        // A field the struct does not declare survives a typed save
        table
            .patch(&id, Row::from([("vip".to_string(), Value::Boolean(true))]))
            .await
            .unwrap();
        table
            .save(
                &id,
                &Contact {
                    name: "Jane".to_string(),
                    age: 28,
                },
            )
            .await
            .unwrap();

        let raw = table
            .repository()
            .find(Contact::TABLE, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.get("age"), Some(&Value::Integer(28)));
        assert_eq!(raw.get("vip"), Some(&Value::Boolean(true)));
    }

    #[tokio::test]
    async fn test_bulk_create_returns_ids_in_order() {
        let table = contacts();
        let ids = table
            .bulk_create(&[
                jane(),
                Contact {
                    name: "John".to_string(),
                    age: 41,
                },
            ])
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(table.find(&ids[0]).await.unwrap().unwrap().name, "Jane");
        assert_eq!(table.find(&ids[1]).await.unwrap().unwrap().name, "John");
    }

    #[tokio::test]
    async fn test_remove_then_find_is_none() {
        let table = contacts();
        let id = table.create(&jane(), None).await.unwrap();
        table.remove(&id).await.unwrap();
        assert!(table.find(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_object_entity_is_a_serialization_error() {
        let err = Plain("scalar".to_string()).to_row().unwrap_err();
        assert!(matches!(err, RepoError::Serialization(_)));
    }
}
