//! Search index integration trait
//!
//! Provides a unified interface for mirroring repository writes into an
//! external search index (real or fake). The repository never calls the index
//! directly; [`mirror_table`] registers event listeners on a
//! [`WithEvents`] decorator, so indexing failures are logged and absorbed
//! like any other listener failure and backends stay unaware of the index.
//!
//! Service-specific implementations (hosted search APIs) belong in separate
//! crates; [`MemoryIndex`] ships here for tests and local runs.

use anyhow::Result;
use async_trait::async_trait;
use silo_api::row::merge_row;
use silo_api::{EventKind, ListenerId, Row, Value, ID_FIELD};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::with_events::WithEvents;

/// Unified interface for search indexes (both real and fake)
///
/// Object ids are the repository row ids; implementations key on the
/// [`ID_FIELD`] entry of each object they are handed.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or replace whole objects in the index.
    async fn save_objects(&self, table: &str, objects: Vec<Row>) -> Result<()>;

    /// Merge partial objects into indexed entries, creating entries that do
    /// not exist yet. [`Value::Delete`] fields are dropped from the entry.
    async fn partial_update_objects(&self, table: &str, objects: Vec<Row>) -> Result<()>;

    /// Remove objects by id. Unknown ids are skipped.
    async fn delete_objects(&self, table: &str, ids: Vec<String>) -> Result<()>;

    /// Drop every object indexed for the table.
    async fn clear_objects(&self, table: &str) -> Result<()>;

    /// Fetch every object indexed for the table, oldest first.
    async fn browse_objects(&self, table: &str) -> Result<Vec<Row>>;
}

/// Listener registrations made by [`mirror_table`], for unhooking later.
#[derive(Debug)]
pub struct MirrorHandle {
    table: String,
    listeners: Vec<(EventKind, ListenerId)>,
}

impl MirrorHandle {
    /// Deregister the mirror's listeners from `repo`. The index keeps
    /// whatever it holds; pair with [`SearchIndex::clear_objects`] to empty
    /// it.
    pub fn unhook<R>(self, repo: &WithEvents<R>) {
        for (event, id) in self.listeners {
            repo.off(event, &self.table, Some(id));
        }
    }
}

/// Keep `index` in step with one table of `repo`.
///
/// Registers create/update/remove listeners that forward each event payload:
/// creates as whole objects, updates as partial objects, removes as id
/// deletes. Like any listener, a failing index call is logged by the
/// decorator and does not fail the repository operation, so the index is
/// eventually consistent at best.
pub fn mirror_table<R>(
    repo: &WithEvents<R>,
    table: &str,
    index: Arc<dyn SearchIndex>,
) -> MirrorHandle {
    let create_id = {
        let index = Arc::clone(&index);
        let owned = table.to_string();
        repo.on(EventKind::Create, table, move |row| {
            let index = Arc::clone(&index);
            let table = owned.clone();
            async move { index.save_objects(&table, vec![row]).await.map_err(Into::into) }
        })
    };

    let update_id = {
        let index = Arc::clone(&index);
        let owned = table.to_string();
        repo.on(EventKind::Update, table, move |row| {
            let index = Arc::clone(&index);
            let table = owned.clone();
            async move {
                index
                    .partial_update_objects(&table, vec![row])
                    .await
                    .map_err(Into::into)
            }
        })
    };

    let remove_id = {
        let index = Arc::clone(&index);
        let owned = table.to_string();
        repo.on(EventKind::Remove, table, move |row| {
            let index = Arc::clone(&index);
            let table = owned.clone();
            async move {
                let Some(id) = row.get(ID_FIELD).and_then(|v| v.as_string()) else {
                    return Err("remove event payload has no id".into());
                };
                index
                    .delete_objects(&table, vec![id.to_string()])
                    .await
                    .map_err(Into::into)
            }
        })
    };

    MirrorHandle {
        table: table.to_string(),
        listeners: vec![
            (EventKind::Create, create_id),
            (EventKind::Update, update_id),
            (EventKind::Remove, remove_id),
        ],
    }
}

/// In-memory [`SearchIndex`] keeping objects per table in arrival order.
#[derive(Clone, Debug, Default)]
pub struct MemoryIndex {
    tables: Arc<Mutex<HashMap<String, Vec<(String, Row)>>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_id(object: &Row) -> Result<String> {
        match object.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            _ => anyhow::bail!("indexed object has no id"),
        }
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn save_objects(&self, table: &str, objects: Vec<Row>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        for object in objects {
            let id = Self::object_id(&object)?;
            match entries.iter_mut().find(|(eid, _)| *eid == id) {
                Some((_, stored)) => *stored = object,
                None => entries.push((id, object)),
            }
        }
        Ok(())
    }

    async fn partial_update_objects(&self, table: &str, objects: Vec<Row>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let entries = tables.entry(table.to_string()).or_default();
        for object in objects {
            let id = Self::object_id(&object)?;
            match entries.iter_mut().find(|(eid, _)| *eid == id) {
                Some((_, stored)) => merge_row(stored, object),
                None => {
                    let mut created = Row::new();
                    created.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    merge_row(&mut created, object);
                    entries.push((id, created));
                }
            }
        }
        Ok(())
    }

    async fn delete_objects(&self, table: &str, ids: Vec<String>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(entries) = tables.get_mut(table) {
            entries.retain(|(id, _)| !ids.contains(id));
        }
        Ok(())
    }

    async fn clear_objects(&self, table: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.remove(table);
        Ok(())
    }

    async fn browse_objects(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(table)
            .map(|entries| entries.iter().map(|(_, row)| row.clone()).collect())
            .unwrap_or_default())
    }
}
