//! SQLite implementation of Repository
//!
//! Rows are stored one table per repository table, each with an `id` TEXT
//! primary key and a `data` TEXT column holding the row as JSON (minus the
//! id). Filters and ordering are pushed down to SQL via `json_extract`;
//! projection happens in Rust after the fetch.
//!
//! The translation is tested against [`crate::MemoryBackend`], which defines
//! the contract semantics. A few SQL-side limitations are inherent to the
//! JSON encoding and accepted:
//!
//! - A field stored as JSON `null` and an absent field both read back as SQL
//!   `NULL`, so filters cannot tell them apart the way the in-memory store
//!   can.
//! - `json_extract` surfaces JSON booleans as the integers 1/0, so a field
//!   mixing booleans with those numbers aliases the two kinds in equality,
//!   membership and ordering. Ordered comparison filters carry a `json_type`
//!   guard and do not.
//! - `DateTime` and `Reference` values read back as plain strings, and
//!   ordered filters on them compare the stored text.
//! - `json_each`/`json_extract` compare composite values by their JSON text.
//!
//! rusqlite is synchronous, so every operation hops onto the blocking pool
//! and takes the connection lock there.

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use silo_api::constraint::resolve_field;
use silo_api::row::{merge_row, project_row, strip_sentinels};
use silo_api::{
    Constraints, Direction, Filter, Operator, RepoError, Result, Row, Value, ID_FIELD,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::api::repository::Repository;

/// Maximum number of rows written inside a single transaction. Larger bulk
/// calls are split into chunks of this size; each chunk commits or rolls
/// back as a unit, so a failure mid-batch can leave earlier chunks applied.
pub const BATCH_LIMIT: usize = 500;

/// SQLite-backed repository.
///
/// Tables are created lazily on first touch, so callers never declare
/// schemas. Generated ids are UUIDv4 strings.
///
/// # Example
///
/// ```rust,no_run
/// use silo::{Repository, Row, SqliteBackend, Value};
///
/// async fn example() -> anyhow::Result<()> {
///     let backend = SqliteBackend::open("app.db")?;
///
///     let mut row = Row::new();
///     row.insert("name".to_string(), Value::String("Jane".to_string()));
///     let id = backend.create("people", row, None).await?;
///
///     assert!(backend.find("people", &id).await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(db_err)?;
        tracing::debug!("sqlite database opened at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database. Useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `op` on the blocking pool with the connection locked.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            op(&mut conn)
        })
        .await
        .map_err(|e| RepoError::Backend(format!("blocking task failed: {e}")))?
    }

    fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn ensure_table(conn: &Connection, table: &str) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (id TEXT PRIMARY KEY, data TEXT NOT NULL)"
            ),
            [],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn find_sync(conn: &Connection, table: &str, id: &str) -> Result<Option<Row>> {
        Self::ensure_table(conn, table)?;
        let mut stmt = conn
            .prepare(&format!("SELECT data FROM \"{table}\" WHERE id = ?"))
            .map_err(db_err)?;
        let mut rows = stmt.query([id]).map_err(db_err)?;
        match rows.next().map_err(db_err)? {
            Some(row) => {
                let data: String = row.get(0).map_err(db_err)?;
                Ok(Some(row_from_stored(id, &data)?))
            }
            None => Ok(None),
        }
    }

    fn query_sync(
        conn: &Connection,
        table: &str,
        constraints: &Constraints,
        fields: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        Self::ensure_table(conn, table)?;

        let mut params: Vec<SqlValue> = Vec::new();
        let where_clause = build_where(&constraints.filters, &mut params);
        let order_clause = build_order_by(&constraints.order_by, &mut params);
        let mut sql = format!("SELECT id, data FROM \"{table}\"{where_clause}{order_clause}");
        if let Some(limit) = constraints.limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let mut sql_rows = stmt.query(params_from_iter(params)).map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(sql_row) = sql_rows.next().map_err(db_err)? {
            let id: String = sql_row.get(0).map_err(db_err)?;
            let data: String = sql_row.get(1).map_err(db_err)?;
            let row = row_from_stored(&id, &data)?;
            results.push(match fields {
                Some(fields) => project_row(&row, fields),
                None => row,
            });
        }

        Ok(results)
    }

    fn count_sync(conn: &Connection, table: &str, constraints: &Constraints) -> Result<usize> {
        Self::ensure_table(conn, table)?;

        // Only the filters matter for cardinality; the limit caps query()
        // fetches, never the count
        let mut params: Vec<SqlValue> = Vec::new();
        let where_clause = build_where(&constraints.filters, &mut params);
        let sql = format!("SELECT COUNT(*) FROM \"{table}\"{where_clause}");

        let count: i64 = conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as usize)
    }

    // Upsert rather than INSERT OR REPLACE: REPLACE would assign a fresh
    // rowid and move the row to the end of insertion order
    fn put_sync(conn: &Connection, table: &str, id: &str, row: &Row) -> Result<()> {
        let data = stored_json(row)?;
        conn.execute(
            &format!(
                "INSERT INTO \"{table}\" (id, data) VALUES (?, ?) \
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data"
            ),
            [id, data.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn create_sync(conn: &Connection, table: &str, mut data: Row, id: Option<String>) -> Result<String> {
        Self::ensure_table(conn, table)?;
        data.remove(ID_FIELD);
        strip_sentinels(&mut data);
        let id = id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(Self::generate_id);
        Self::put_sync(conn, table, &id, &data)?;
        Ok(id)
    }

    fn bulk_create_sync(conn: &mut Connection, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        Self::ensure_table(conn, table)?;
        let mut created = Vec::with_capacity(rows.len());

        for chunk in rows.chunks(BATCH_LIMIT) {
            let tx = conn.transaction().map_err(db_err)?;
            for row in chunk {
                let mut row = row.clone();
                let id = match row.remove(ID_FIELD) {
                    Some(Value::String(id)) if !id.is_empty() => id,
                    _ => Self::generate_id(),
                };
                strip_sentinels(&mut row);
                Self::put_sync(&tx, table, &id, &row)?;
                row.insert(ID_FIELD.to_string(), Value::String(id));
                created.push(row);
            }
            tx.commit().map_err(db_err)?;
        }

        if rows_chunked(created.len()) {
            tracing::debug!(
                "bulk_create on '{}' split {} rows into {} transactions",
                table,
                created.len(),
                created.len().div_ceil(BATCH_LIMIT)
            );
        }
        Ok(created)
    }

    fn update_sync(conn: &Connection, table: &str, id: &str, data: Row) -> Result<()> {
        Self::ensure_table(conn, table)?;
        // Read-merge-write: the delete sentinel is only visible before JSON
        // serialization, so the merge has to happen on Row values
        if let Some(mut stored) = Self::find_sync(conn, table, id)? {
            merge_row(&mut stored, data);
            stored.remove(ID_FIELD);
            Self::put_sync(conn, table, id, &stored)?;
        }
        Ok(())
    }

    fn bulk_update_sync(conn: &mut Connection, table: &str, rows: Vec<Row>) -> Result<()> {
        Self::ensure_table(conn, table)?;

        // Validate up front so a malformed batch changes nothing
        for row in &rows {
            let has_id = matches!(row.get(ID_FIELD), Some(Value::String(id)) if !id.is_empty());
            if !has_id {
                return Err(RepoError::MissingId {
                    table: table.to_string(),
                });
            }
        }

        for chunk in rows.chunks(BATCH_LIMIT) {
            let tx = conn.transaction().map_err(db_err)?;
            for row in chunk {
                let mut row = row.clone();
                if let Some(Value::String(id)) = row.remove(ID_FIELD) {
                    Self::update_sync(&tx, table, &id, row)?;
                }
            }
            tx.commit().map_err(db_err)?;
        }

        Ok(())
    }

    fn remove_sync(conn: &Connection, table: &str, id: &str) -> Result<()> {
        Self::ensure_table(conn, table)?;
        conn.execute(&format!("DELETE FROM \"{table}\" WHERE id = ?"), [id])
            .map_err(db_err)?;
        Ok(())
    }

    fn bulk_remove_sync(conn: &mut Connection, table: &str, ids: Vec<String>) -> Result<()> {
        Self::ensure_table(conn, table)?;

        for chunk in ids.chunks(BATCH_LIMIT) {
            let tx = conn.transaction().map_err(db_err)?;
            let placeholders = vec!["?"; chunk.len()].join(", ");
            tx.execute(
                &format!("DELETE FROM \"{table}\" WHERE id IN ({placeholders})"),
                params_from_iter(chunk.iter().map(|id| SqlValue::Text(id.clone()))),
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteBackend {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Row>> {
        if id.is_empty() {
            return Ok(None);
        }
        let table = validated_table(table)?;
        let id = id.to_string();
        self.with_conn(move |conn| Self::find_sync(conn, &table, &id))
            .await
    }

    async fn query(
        &self,
        table: &str,
        constraints: Constraints,
        fields: Option<Vec<String>>,
    ) -> Result<Vec<Row>> {
        let table = validated_table(table)?;
        self.with_conn(move |conn| {
            Self::query_sync(conn, &table, &constraints, fields.as_deref())
        })
        .await
    }

    async fn query_count(&self, table: &str, constraints: Constraints) -> Result<usize> {
        let table = validated_table(table)?;
        self.with_conn(move |conn| Self::count_sync(conn, &table, &constraints))
            .await
    }

    async fn create(&self, table: &str, data: Row, id: Option<String>) -> Result<String> {
        let table = validated_table(table)?;
        self.with_conn(move |conn| Self::create_sync(conn, &table, data, id))
            .await
    }

    async fn bulk_create(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        let table = validated_table(table)?;
        self.with_conn(move |conn| Self::bulk_create_sync(conn, &table, rows))
            .await
    }

    async fn update(&self, table: &str, id: &str, data: Row) -> Result<()> {
        let table = validated_table(table)?;
        let id = id.to_string();
        self.with_conn(move |conn| Self::update_sync(conn, &table, &id, data))
            .await
    }

    async fn bulk_update(&self, table: &str, rows: Vec<Row>) -> Result<()> {
        let table = validated_table(table)?;
        self.with_conn(move |conn| Self::bulk_update_sync(conn, &table, rows))
            .await
    }

    async fn remove(&self, table: &str, id: &str) -> Result<()> {
        let table = validated_table(table)?;
        let id = id.to_string();
        self.with_conn(move |conn| Self::remove_sync(conn, &table, &id))
            .await
    }

    async fn bulk_remove(&self, table: &str, ids: Vec<String>) -> Result<()> {
        let table = validated_table(table)?;
        self.with_conn(move |conn| Self::bulk_remove_sync(conn, &table, ids))
            .await
    }
}

fn db_err(err: rusqlite::Error) -> RepoError {
    RepoError::Database(err.to_string())
}

fn rows_chunked(total: usize) -> bool {
    total > BATCH_LIMIT
}

/// Table names are interpolated into SQL (identifiers cannot be bound), so
/// only plain identifiers are accepted.
fn validated_table(table: &str) -> Result<String> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(table.to_string())
    } else {
        Err(RepoError::InvalidTable(table.to_string()))
    }
}

/// Serialize a row (already stripped of its id) into the data column.
fn stored_json(row: &Row) -> Result<String> {
    let json: serde_json::Value = Value::Object(row.clone()).into();
    Ok(serde_json::to_string(&json)?)
}

/// Rebuild a row from the id column and data JSON.
fn row_from_stored(id: &str, data: &str) -> Result<Row> {
    let json: serde_json::Value = serde_json::from_str(data)?;
    let mut row = match Value::from_json_value(json) {
        Value::Object(map) => map,
        other => {
            return Err(RepoError::Serialization(format!(
                "stored row is not a JSON object: {other:?}"
            )))
        }
    };
    row.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Ok(row)
}

fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        // json_extract yields integers for JSON booleans
        Value::Boolean(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::DateTime(s) => SqlValue::Text(s.clone()),
        Value::Reference(r) => SqlValue::Text(r.clone()),
        Value::Array(_) | Value::Object(_) => {
            let json: serde_json::Value = value.clone().into();
            SqlValue::Text(json.to_string())
        }
        Value::Null | Value::Delete => SqlValue::Null,
    }
}

/// Whether a target value can ever equal the TEXT id column. Ids are always
/// strings, so non-string targets short-circuit instead of relying on
/// SQLite affinity conversions.
fn id_comparable(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::DateTime(_) | Value::Reference(_)
    )
}

/// The `json_type()` names a target value's kind can match under the weak
/// ordering. `None` means no stored value is ordered against this target.
fn ordered_type_guard(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(_) | Value::DateTime(_) | Value::Reference(_) => Some("('text')"),
        Value::Integer(_) | Value::Float(_) => Some("('integer', 'real')"),
        Value::Boolean(_) => Some("('true', 'false')"),
        _ => None,
    }
}

const NEVER: &str = "1 = 0";
const ALWAYS: &str = "1 = 1";

/// Translate one filter into a SQL condition, pushing bind values onto
/// `params` in textual order.
fn build_condition(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
    let field = resolve_field(&filter.field);
    if field == ID_FIELD {
        build_id_condition(filter.op, &filter.value, params)
    } else {
        build_json_condition(field, filter.op, &filter.value, params)
    }
}

/// Conditions against the id column. The column is TEXT and never NULL,
/// which rules out most of the missing-field handling the JSON path needs.
fn build_id_condition(op: Operator, value: &Value, params: &mut Vec<SqlValue>) -> String {
    match op {
        Operator::Eq => {
            if id_comparable(value) {
                params.push(bind_value(value));
                "id = ?".to_string()
            } else {
                NEVER.to_string()
            }
        }
        Operator::Ne => {
            if id_comparable(value) {
                params.push(bind_value(value));
                "id != ?".to_string()
            } else {
                ALWAYS.to_string()
            }
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            if id_comparable(value) {
                params.push(bind_value(value));
                format!("id {} ?", comparison_sql(op))
            } else {
                NEVER.to_string()
            }
        }
        Operator::In | Operator::NotIn => {
            let members: Vec<&Value> = value
                .as_array()
                .map(|arr| arr.iter().filter(|v| id_comparable(v)).collect())
                .unwrap_or_default();
            if members.is_empty() {
                return match op {
                    Operator::In => NEVER.to_string(),
                    _ => ALWAYS.to_string(),
                };
            }
            let placeholders = vec!["?"; members.len()].join(", ");
            for member in members {
                params.push(bind_value(member));
            }
            match op {
                Operator::In => format!("id IN ({placeholders})"),
                _ => format!("id NOT IN ({placeholders})"),
            }
        }
        // The id is a scalar; it never contains anything
        Operator::Contains | Operator::ContainsAny => NEVER.to_string(),
    }
}

/// Conditions against a JSON field. `json_extract` returns SQL NULL for an
/// absent field, which the negative operators must treat as a match.
fn build_json_condition(
    field: &str,
    op: Operator,
    value: &Value,
    params: &mut Vec<SqlValue>,
) -> String {
    let path = format!("$.{field}");
    match op {
        Operator::Eq => {
            params.push(SqlValue::Text(path));
            params.push(bind_value(value));
            // IS instead of = so an explicit Null target can match stored nulls
            "json_extract(data, ?) IS ?".to_string()
        }
        Operator::Ne => {
            params.push(SqlValue::Text(path));
            params.push(bind_value(value));
            "json_extract(data, ?) IS NOT ?".to_string()
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            match value {
                // Only an equal (stored null) value satisfies <= or >= against Null
                Value::Null => match op {
                    Operator::Le | Operator::Ge => {
                        params.push(SqlValue::Text(path));
                        "json_type(data, ?) = 'null'".to_string()
                    }
                    _ => NEVER.to_string(),
                },
                _ => match ordered_type_guard(value) {
                    Some(guard) => {
                        params.push(SqlValue::Text(path.clone()));
                        params.push(SqlValue::Text(path));
                        params.push(bind_value(value));
                        format!(
                            "(json_type(data, ?) IN {guard} AND json_extract(data, ?) {} ?)",
                            comparison_sql(op)
                        )
                    }
                    None => NEVER.to_string(),
                },
            }
        }
        Operator::In | Operator::NotIn => build_membership_condition(&path, op, value, params),
        Operator::Contains => {
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::Text(path));
            params.push(bind_value(value));
            "(json_type(data, ?) = 'array' AND EXISTS (SELECT 1 FROM json_each(data, ?) \
             WHERE json_each.value IS ?))"
                .to_string()
        }
        Operator::ContainsAny => {
            let Some(targets) = value.as_array() else {
                return NEVER.to_string();
            };
            if targets.is_empty() {
                return NEVER.to_string();
            }
            let non_null: Vec<&Value> = targets.iter().filter(|v| !v.is_null()).collect();
            let has_null = non_null.len() < targets.len();
            params.push(SqlValue::Text(path.clone()));
            params.push(SqlValue::Text(path));
            let mut arms = Vec::new();
            if !non_null.is_empty() {
                let placeholders = vec!["?"; non_null.len()].join(", ");
                for member in &non_null {
                    params.push(bind_value(member));
                }
                arms.push(format!("json_each.value IN ({placeholders})"));
            }
            if has_null {
                arms.push("json_each.value IS NULL".to_string());
            }
            let member_match = match arms.len() {
                1 => arms.remove(0),
                _ => format!("({})", arms.join(" OR ")),
            };
            format!(
                "(json_type(data, ?) = 'array' AND EXISTS (SELECT 1 FROM json_each(data, ?) \
                 WHERE {member_match}))"
            )
        }
    }
}

/// `IN` / `NOT IN` against a JSON field. A missing field satisfies `NOT IN`
/// (the row's value is not in the list), hence the IS NULL arm. Null list
/// members are matched through IS NULL rather than IN, which SQL three-valued
/// logic would swallow.
fn build_membership_condition(
    path: &str,
    op: Operator,
    value: &Value,
    params: &mut Vec<SqlValue>,
) -> String {
    let Some(targets) = value.as_array() else {
        return match op {
            Operator::In => NEVER.to_string(),
            _ => ALWAYS.to_string(),
        };
    };
    let non_null: Vec<&Value> = targets.iter().filter(|v| !v.is_null()).collect();
    let has_null = non_null.len() < targets.len();

    match op {
        Operator::In => {
            let mut arms = Vec::new();
            if !non_null.is_empty() {
                let placeholders = vec!["?"; non_null.len()].join(", ");
                params.push(SqlValue::Text(path.to_string()));
                for member in &non_null {
                    params.push(bind_value(member));
                }
                arms.push(format!("json_extract(data, ?) IN ({placeholders})"));
            }
            if has_null {
                params.push(SqlValue::Text(path.to_string()));
                arms.push("json_extract(data, ?) IS NULL".to_string());
            }
            match arms.len() {
                0 => NEVER.to_string(),
                1 => arms.remove(0),
                _ => format!("({})", arms.join(" OR ")),
            }
        }
        _ => {
            if targets.is_empty() {
                return ALWAYS.to_string();
            }
            if non_null.is_empty() {
                // Only Null in the list: present non-null values all pass
                params.push(SqlValue::Text(path.to_string()));
                return "json_type(data, ?) IS NOT 'null'".to_string();
            }
            let placeholders = vec!["?"; non_null.len()].join(", ");
            params.push(SqlValue::Text(path.to_string()));
            params.push(SqlValue::Text(path.to_string()));
            for member in non_null {
                params.push(bind_value(member));
            }
            format!(
                "(json_extract(data, ?) IS NULL OR json_extract(data, ?) NOT IN ({placeholders}))"
            )
        }
    }
}

fn comparison_sql(op: Operator) -> &'static str {
    match op {
        Operator::Lt => "<",
        Operator::Le => "<=",
        Operator::Gt => ">",
        Operator::Ge => ">=",
        _ => unreachable!("not a comparison operator"),
    }
}

fn build_where(filters: &[Filter], params: &mut Vec<SqlValue>) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let conditions: Vec<String> = filters
        .iter()
        .map(|f| build_condition(f, params))
        .collect();
    format!(" WHERE {}", conditions.join(" AND "))
}

/// Multi-key ORDER BY. The trailing rowid key makes equal-key rows come out
/// in insertion order, matching the reference backend's stable sort, and
/// carries the whole ordering when no keys are given.
fn build_order_by(order_by: &[(String, Direction)], params: &mut Vec<SqlValue>) -> String {
    let mut keys = Vec::with_capacity(order_by.len() + 1);
    for (field, direction) in order_by {
        let field = resolve_field(field);
        let dir = match direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        if field == ID_FIELD {
            keys.push(format!("id {dir}"));
        } else {
            params.push(SqlValue::Text(format!("$.{field}")));
            keys.push(format!("json_extract(data, ?) {dir}"));
        }
    }
    keys.push("rowid ASC".to_string());
    format!(" ORDER BY {}", keys.join(", "))
}
