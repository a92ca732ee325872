//! Event-emitting repository decorator
//!
//! Wraps any [`Repository`] and emits mutation events around writes. Reads
//! pass straight through. Listeners are registered per `(event, table)` pair
//! and dispatched sequentially in registration order.
//!
//! # Payloads
//!
//! - `create`: the create payload plus the assigned id. The row is not
//!   re-read, so backend-side transformations are not reflected.
//! - `update`: the partial update payload plus the id.
//! - `beforeRemove` / `remove`: a row carrying only the id.
//!
//! Bulk writes emit one event per affected row, in input order. A bulk
//! remove emits every `beforeRemove` first, then deletes, then every
//! `remove`, so `beforeRemove` listeners can still read related state for
//! all doomed rows.
//!
//! # Failure isolation
//!
//! A listener returning `Err` is logged and skipped; it never aborts the
//! mutation or the remaining listeners. Events fire only after the inner
//! write succeeded (`beforeRemove` being the deliberate exception).

use async_trait::async_trait;
use silo_api::{
    BoxListenerFuture, Constraints, EventKind, Listener, ListenerId, ListenerResult, Result, Row,
    Value, ID_FIELD,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::api::repository::Repository;

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    by_key: HashMap<(EventKind, String), Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    fn register(&mut self, event: EventKind, table: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.by_key
            .entry((event, table.to_string()))
            .or_default()
            .push((id, listener));
        id
    }

    fn deregister(&mut self, event: EventKind, table: &str, id: Option<ListenerId>) {
        let key = (event, table.to_string());
        match id {
            Some(id) => {
                if let Some(listeners) = self.by_key.get_mut(&key) {
                    listeners.retain(|(existing, _)| *existing != id);
                    if listeners.is_empty() {
                        self.by_key.remove(&key);
                    }
                }
            }
            None => {
                self.by_key.remove(&key);
            }
        }
    }

    /// Snapshot the listeners for one `(event, table)` pair. Dispatch works
    /// on the snapshot, so listeners added or removed mid-dispatch only
    /// affect later emissions.
    fn snapshot(&self, event: EventKind, table: &str) -> Vec<(ListenerId, Listener)> {
        self.by_key
            .get(&(event, table.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Repository decorator that emits mutation events.
///
/// # Example
///
/// ```rust,no_run
/// use silo::{EventKind, MemoryBackend, Repository, Row, Value, WithEvents};
///
/// async fn example() -> anyhow::Result<()> {
///     let repo = WithEvents::new(MemoryBackend::new());
///
///     repo.on(EventKind::Create, "tasks", |row: Row| async move {
///         println!("created {:?}", row.get("id"));
///         Ok(())
///     });
///
///     let mut task = Row::new();
///     task.insert("title".to_string(), Value::String("ship it".to_string()));
///     repo.create("tasks", task, None).await?;
///     Ok(())
/// }
/// ```
pub struct WithEvents<R> {
    inner: R,
    registry: Arc<RwLock<ListenerRegistry>>,
}

impl<R: Clone> Clone for WithEvents<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R> WithEvents<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            registry: Arc::new(RwLock::new(ListenerRegistry::default())),
        }
    }

    /// The wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Unwrap the decorator, discarding all listeners.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Register an async listener for `event` on `table`.
    ///
    /// Listeners run sequentially in registration order and may fail
    /// independently; see the module docs for payload shapes.
    ///
    /// # Returns
    ///
    /// A handle for deregistering this listener via [`WithEvents::off`].
    pub fn on<F, Fut>(&self, event: EventKind, table: &str, listener: F) -> ListenerId
    where
        F: Fn(Row) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        let listener: Listener =
            Arc::new(move |row| Box::pin(listener(row)) as BoxListenerFuture);
        let mut registry = self.registry.write().unwrap();
        registry.register(event, table, listener)
    }

    /// Deregister listeners for `event` on `table`.
    ///
    /// With `Some(id)` only that listener is removed; with `None` every
    /// listener for the pair is removed. Unknown ids are a no-op.
    pub fn off(&self, event: EventKind, table: &str, id: Option<ListenerId>) {
        let mut registry = self.registry.write().unwrap();
        registry.deregister(event, table, id);
    }

    async fn emit(&self, event: EventKind, table: &str, payload: &Row) {
        let snapshot = {
            let registry = self.registry.read().unwrap();
            registry.snapshot(event, table)
        };
        for (id, listener) in snapshot {
            if let Err(err) = listener(payload.clone()).await {
                tracing::error!(
                    "Listener {} for {} on table '{}' failed: {}",
                    id.0,
                    event,
                    table,
                    err
                );
            }
        }
    }
}

fn id_only_row(id: &str) -> Row {
    let mut row = Row::new();
    row.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    row
}

fn with_id(mut row: Row, id: &str) -> Row {
    row.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    row
}

#[async_trait]
impl<R: Repository> Repository for WithEvents<R> {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Row>> {
        self.inner.find(table, id).await
    }

    async fn query(
        &self,
        table: &str,
        constraints: Constraints,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Row>> {
        self.inner.query(table, constraints, fields).await
    }

    async fn query_count(&self, table: &str, constraints: Constraints) -> Result<usize> {
        self.inner.query_count(table, constraints).await
    }

    async fn create(&self, table: &str, data: Row, id: Option<String>) -> Result<String> {
        let payload = data.clone();
        let id = self.inner.create(table, data, id).await?;
        self.emit(EventKind::Create, table, &with_id(payload, &id))
            .await;
        Ok(id)
    }

    async fn bulk_create(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let created = self.inner.bulk_create(table, rows).await?;
        for row in &created {
            self.emit(EventKind::Create, table, row).await;
        }
        Ok(created)
    }

    async fn update(&self, table: &str, id: &str, data: Row) -> Result<()> {
        let payload = data.clone();
        self.inner.update(table, id, data).await?;
        self.emit(EventKind::Update, table, &with_id(payload, id))
            .await;
        Ok(())
    }

    async fn bulk_update(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let payloads = rows.clone();
        self.inner.bulk_update(table, rows).await?;
        for payload in payloads {
            self.emit(EventKind::Update, table, &payload).await;
        }
        Ok(())
    }

    async fn remove(&self, table: &str, id: &str) -> Result<()> {
        let payload = id_only_row(id);
        self.emit(EventKind::BeforeRemove, table, &payload).await;
        self.inner.remove(table, id).await?;
        self.emit(EventKind::Remove, table, &payload).await;
        Ok(())
    }

    async fn bulk_remove(&self, table: &str, ids: Vec<String>) -> Result<()> {
        let payloads: Vec<Row> = ids.iter().map(|id| id_only_row(id)).collect();
        for payload in &payloads {
            self.emit(EventKind::BeforeRemove, table, payload).await;
        }
        self.inner.bulk_remove(table, ids).await?;
        for payload in &payloads {
            self.emit(EventKind::Remove, table, payload).await;
        }
        Ok(())
    }
}
