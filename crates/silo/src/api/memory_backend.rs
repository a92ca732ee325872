//! In-memory implementation of Repository
//!
//! This module provides a simple HashMap-based implementation for testing
//! and as a reference for backend semantics. Whatever this backend does is
//! what the contract means; adapter backends are tested against it.

use async_trait::async_trait;
use silo_api::constraint::compare_rows;
use silo_api::row::{merge_row, project_row, strip_sentinels};
use silo_api::{Constraints, RepoError, Result, Row, Value, ID_FIELD};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::repository::Repository;

/// In-memory table storage using HashMaps.
///
/// This is a lightweight, non-persistent backend useful for:
/// - Unit testing without a database on disk
/// - Mocking in frontend development
/// - Reference implementation for documentation
/// - Property-based testing baseline
///
/// Ids are generated from a single counter shared by every table, stringified
/// (`"0"`, `"1"`, ...), so a fresh store produces a deterministic id sequence
/// regardless of which tables the rows land in.
///
/// Cloning yields another handle onto the same store; to share one store
/// across components, clone the backend.
///
/// # Example
///
/// ```rust,no_run
/// use silo::{MemoryBackend, Repository, Row, Value};
///
/// async fn example() -> anyhow::Result<()> {
///     let backend = MemoryBackend::new();
///
///     let mut row = Row::new();
///     row.insert("name".to_string(), Value::String("Jane".to_string()));
///     let id = backend.create("people", row, None).await?;
///
///     let found = backend.find("people", &id).await?;
///     assert!(found.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Tables by name
    tables: HashMap<String, TableState>,
    /// Counter for deterministic id generation, shared across tables
    next_id: u64,
}

#[derive(Debug, Default)]
struct TableState {
    /// Rows by id
    rows: HashMap<String, Row>,
    /// Ids in insertion order; queries without order_by replay this sequence
    order: Vec<String>,
}

impl TableState {
    /// Insert or replace a row, recording insertion order for new ids.
    /// Replacing an existing id keeps its original position.
    fn put(&mut self, id: String, mut row: Row) {
        row.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        if self.rows.insert(id.clone(), row).is_none() {
            self.order.push(id);
        }
    }

    fn delete(&mut self, id: &str) {
        if self.rows.remove(id).is_some() {
            self.order.retain(|existing| existing != id);
        }
    }

    /// Rows in insertion order.
    fn rows_in_order(&self) -> impl Iterator<Item = &Row> {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the next stringified counter id, skipping ids the target
    /// table already holds (seeded or explicit ids may have claimed them).
    fn generate_id(state: &mut StoreState, table: &str) -> String {
        loop {
            let id = state.next_id.to_string();
            state.next_id += 1;
            let taken = state
                .tables
                .get(table)
                .is_some_and(|t| t.rows.contains_key(&id));
            if !taken {
                return id;
            }
        }
    }

    /// Pull an explicit string id out of a row payload, if present.
    fn take_row_id(row: &mut Row) -> Option<String> {
        match row.remove(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    /// Load rows directly into a table, bypassing the repository surface.
    /// Rows keep their own id when they carry one; otherwise one is
    /// generated. Intended for test setup.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut state = self.state.write().unwrap();
        for mut row in rows {
            let id = Self::take_row_id(&mut row)
                .unwrap_or_else(|| Self::generate_id(&mut state, table));
            strip_sentinels(&mut row);
            state.tables.entry(table.to_string()).or_default().put(id, row);
        }
    }

    /// Dump a table's rows in insertion order, without filtering or
    /// projection. Intended for test assertions.
    pub fn raw_rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.read().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.rows_in_order().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear every table and restart the id counter at zero.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.tables.clear();
        state.next_id = 0;
    }

    /// Count of rows across all tables.
    pub fn total_rows(&self) -> usize {
        let state = self.state.read().unwrap();
        state.tables.values().map(|t| t.rows.len()).sum()
    }
}

#[async_trait]
impl Repository for MemoryBackend {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Row>> {
        if id.is_empty() {
            return Ok(None);
        }
        let state = self.state.read().unwrap();
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.rows.get(id))
            .cloned())
    }

    async fn query(
        &self,
        table: &str,
        constraints: Constraints,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Row>> {
        let state = self.state.read().unwrap();
        let Some(table_state) = state.tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Row> = table_state
            .rows_in_order()
            .filter(|row| constraints.matches(row))
            .cloned()
            .collect();

        if !constraints.order_by.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &constraints.order_by));
        }

        if let Some(limit) = constraints.limit {
            rows.truncate(limit);
        }

        if let Some(fields) = fields {
            rows = rows.iter().map(|row| project_row(row, &fields)).collect();
        }

        Ok(rows)
    }

    async fn query_count(&self, table: &str, constraints: Constraints) -> Result<usize> {
        let state = self.state.read().unwrap();
        let Some(table_state) = state.tables.get(table) else {
            return Ok(0);
        };

        // Cardinality of the filtered set; order_by and limit are fetch
        // concerns and do not apply here
        Ok(table_state
            .rows_in_order()
            .filter(|row| constraints.matches(row))
            .count())
    }

    async fn create(&self, table: &str, mut data: Row, id: Option<String>) -> Result<String> {
        let mut state = self.state.write().unwrap();
        data.remove(ID_FIELD);
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Self::generate_id(&mut state, table));
        strip_sentinels(&mut data);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .put(id.clone(), data);
        Ok(id)
    }

    async fn bulk_create(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let mut state = self.state.write().unwrap();
        let mut created = Vec::with_capacity(rows.len());

        for mut row in rows {
            let id = Self::take_row_id(&mut row)
                .unwrap_or_else(|| Self::generate_id(&mut state, table));
            strip_sentinels(&mut row);
            let table_state = state.tables.entry(table.to_string()).or_default();
            table_state.put(id.clone(), row);
            // put() stores the id inline, so the stored copy is the result
            if let Some(stored) = table_state.rows.get(&id) {
                created.push(stored.clone());
            }
        }

        Ok(created)
    }

    async fn update(&self, table: &str, id: &str, data: Row) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(stored) = state
            .tables
            .get_mut(table)
            .and_then(|t| t.rows.get_mut(id))
        {
            merge_row(stored, data);
        }
        Ok(())
    }

    async fn bulk_update(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let mut state = self.state.write().unwrap();

        // Validate up front so a malformed batch changes nothing
        for row in &rows {
            let has_id = matches!(row.get(ID_FIELD), Some(Value::String(id)) if !id.is_empty());
            if !has_id {
                return Err(RepoError::MissingId {
                    table: table.to_string(),
                });
            }
        }

        for mut row in rows {
            let id = match Self::take_row_id(&mut row) {
                Some(id) => id,
                None => continue,
            };
            if let Some(stored) = state
                .tables
                .get_mut(table)
                .and_then(|t| t.rows.get_mut(&id))
            {
                merge_row(stored, row);
            }
        }

        Ok(())
    }

    async fn remove(&self, table: &str, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(table_state) = state.tables.get_mut(table) {
            table_state.delete(id);
        }
        Ok(())
    }

    async fn bulk_remove(&self, table: &str, ids: Vec<String>) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(table_state) = state.tables.get_mut(table) {
            for id in ids {
                table_state.delete(&id);
            }
        }
        Ok(())
    }
}
