use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

pub mod constraint;
pub mod events;
pub mod row;

// Re-export constraint types
pub use constraint::{Constraints, Direction, Filter, Operator, ID_FIELD, ID_PATH};

// Re-export event types
pub use events::{BoxListenerFuture, EventKind, Listener, ListenerId, ListenerResult};

/// A row is a schema-free mapping from field name to value. Every persisted
/// row carries its identifier under [`ID_FIELD`].
pub type Row = HashMap<String, Value>;

/// Field value union shared by every backend.
///
/// JSON-like at the contract level; the extra variants carry backend-meaningful
/// markers: `DateTime` and `Reference` are coerced per adapter, and `Delete` is
/// the update-payload sentinel meaning "remove this field from the row".
/// `Delete` is never stored; backends drop sentinel fields before writing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    // Stored as RFC3339 text; use as_datetime() for the parsed chrono::DateTime
    DateTime(String),
    // Path of another row ("table/id"); adapters map this to their native
    // reference representation
    Reference(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    Null,
    // Update-payload sentinel. Serializes as null (untagged unit variant), but
    // a stored row never contains it.
    Delete,
}

impl Value {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get datetime value as parsed chrono::DateTime
    pub fn as_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Value::DateTime(s) => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            _ => None,
        }
    }

    /// Create a Value from a chrono::DateTime
    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Value::DateTime(dt.to_rfc3339())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is the delete sentinel.
    pub fn is_delete(&self) -> bool {
        matches!(self, Value::Delete)
    }

    /// Weak cross-value ordering used by operator evaluation and sorting.
    ///
    /// Numbers compare numerically across `Integer`/`Float`; strings, booleans,
    /// references and datetimes compare within their own kind (datetimes by
    /// instant when both sides parse). Mixed kinds, arrays and objects are
    /// unordered and return `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Reference(a), Value::Reference(b)) => Some(a.cmp(b)),
            (Value::DateTime(_), Value::DateTime(_)) => {
                match (self.as_datetime(), other.as_datetime()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => match (self, other) {
                        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
                        _ => unreachable!(),
                    },
                }
            }
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality as the `==` operator sees it: structural equality, widened so
    /// that `Integer(1)` equals `Float(1.0)`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self == other || self.compare(other) == Some(Ordering::Equal)
    }

    /// Create a Value from a serde_json::Value
    pub fn from_json_value(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from_json_value).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json_value(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T> From<Vec<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(map: HashMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json_value(v)
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => serde_json::Value::String(s),
            Value::Integer(i) => serde_json::Value::Number(serde_json::Number::from(i)),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Boolean(b) => serde_json::Value::Bool(b),
            Value::DateTime(s) => serde_json::Value::String(s),
            Value::Reference(r) => serde_json::Value::String(r),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(Into::into).collect())
            }
            Value::Object(obj) => {
                serde_json::Value::Object(obj.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Null | Value::Delete => serde_json::Value::Null,
        }
    }
}

/// Structured error type for repository operations.
///
/// Absence is never an error: `find` on an unknown id resolves to `None`,
/// queries on unknown tables resolve to empty, removing an unknown id is a
/// no-op. These variants cover transport/backend failures and programmer
/// errors only, so callers can always tell "found nothing" from "failed".
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("bulk update row for table {table} is missing an id")]
    MissingId { table: String },

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        RepoError::Serialization(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;
