//! Query constraints shared by every backend: the closed operator set,
//! where-clauses, ordering and limits.
//!
//! Backends consume these structurally. The in-memory backend evaluates
//! [`Operator::matches`] row by row; SQL backends translate each filter to a
//! native predicate. Both agree on the semantics documented here.

use crate::{RepoError, Row, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Canonical name of the identifier field on every row.
pub const ID_FIELD: &str = "id";

/// Sentinel field path that always resolves to the row identifier, so callers
/// can filter or order by id without knowing the backend's column name.
pub const ID_PATH: &str = "__id__";

/// Resolve a constraint field path to the stored field name.
pub fn resolve_field(field: &str) -> &str {
    if field == ID_PATH {
        ID_FIELD
    } else {
        field
    }
}

/// The closed set of filter operators every backend must support.
///
/// Being an enum, an unknown operator is unrepresentable once parsed; the only
/// fail-fast point is [`Operator::from_str`], which rejects unknown tokens with
/// [`RepoError::UnknownOperator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "array-contains")]
    Contains,
    #[serde(rename = "array-contains-any")]
    ContainsAny,
}

impl Operator {
    /// The wire token for this operator.
    pub fn token(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
            Operator::NotIn => "not-in",
            Operator::Contains => "array-contains",
            Operator::ContainsAny => "array-contains-any",
        }
    }

    /// Evaluate this operator against a row field.
    ///
    /// `row_value` is `None` when the row does not carry the field. A missing
    /// field satisfies only the negative operators (`!=`, `not-in`); every
    /// other operator evaluates to false. Ordered comparisons between values
    /// without a common order (see [`Value::compare`]) are false.
    pub fn matches(&self, row_value: Option<&Value>, target: &Value) -> bool {
        match self {
            Operator::Eq => match row_value {
                Some(v) => v.loosely_equals(target),
                None => false,
            },
            Operator::Ne => match row_value {
                Some(v) => !v.loosely_equals(target),
                None => true,
            },
            Operator::Lt => ordered(row_value, target, |o| o == Ordering::Less),
            Operator::Le => ordered(row_value, target, |o| o != Ordering::Greater),
            Operator::Gt => ordered(row_value, target, |o| o == Ordering::Greater),
            Operator::Ge => ordered(row_value, target, |o| o != Ordering::Less),
            Operator::In => match row_value {
                Some(v) => in_array(v, target),
                None => false,
            },
            Operator::NotIn => match row_value {
                Some(v) => !in_array(v, target),
                None => true,
            },
            Operator::Contains => match row_value.and_then(Value::as_array) {
                Some(items) => items.iter().any(|item| item.loosely_equals(target)),
                None => false,
            },
            Operator::ContainsAny => {
                match (row_value.and_then(Value::as_array), target.as_array()) {
                    (Some(items), Some(targets)) => items
                        .iter()
                        .any(|item| targets.iter().any(|t| item.loosely_equals(t))),
                    _ => false,
                }
            }
        }
    }
}

fn ordered(row_value: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match row_value {
        Some(v) => v.compare(target).map(&accept).unwrap_or(false),
        None => false,
    }
}

fn in_array(value: &Value, target: &Value) -> bool {
    match target.as_array() {
        Some(targets) => targets.iter().any(|t| value.loosely_equals(t)),
        None => false,
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Operator {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "in" => Ok(Operator::In),
            "not-in" => Ok(Operator::NotIn),
            "array-contains" => Ok(Operator::Contains),
            "array-contains-any" => Ok(Operator::ContainsAny),
            other => Err(RepoError::UnknownOperator(other.to_string())),
        }
    }
}

/// A single field predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Filter {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether `row` satisfies this predicate.
    pub fn matches(&self, row: &Row) -> bool {
        let field = resolve_field(&self.field);
        self.op.matches(row.get(field), &self.value)
    }
}

/// Sort direction for an order-by key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn apply(&self, ord: Ordering) -> Ordering {
        match self {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

/// Declarative query constraints: filters ANDed together, multi-key ordering
/// and an optional result cap, applied in that sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<(String, Direction)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, op, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` satisfies every filter.
    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// Compare two rows under a multi-key ordering.
///
/// Keys are consulted in declaration order; the first non-equal key decides.
/// Values of different kinds sort by a fixed kind ladder (missing and `Null`
/// lowest, then booleans, numbers, datetimes, strings), so ascending order
/// puts rows lacking the field first, the way SQL sorts NULLs. Pairs the
/// ladder cannot split (same kind but unordered, both missing) count as
/// equal, and a stable sort leaves them in insertion order.
pub fn compare_rows(a: &Row, b: &Row, order_by: &[(String, Direction)]) -> Ordering {
    for (field, direction) in order_by {
        let field = resolve_field(field);
        let (x, y) = (a.get(field), b.get(field));
        let ord = match sort_rank(x).cmp(&sort_rank(y)) {
            Ordering::Equal => match (x, y) {
                (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
            unequal => unequal,
        };
        let ord = direction.apply(ord);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Kind ladder for sorting. Groups the kinds `Value::compare` can order
/// within, so the combined comparator is total and safe for `sort_by`.
fn sort_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) | Some(Value::Delete) => 0,
        Some(Value::Boolean(_)) => 1,
        Some(Value::Integer(_)) | Some(Value::Float(_)) => 2,
        Some(Value::DateTime(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Reference(_)) => 5,
        Some(Value::Array(_)) => 6,
        Some(Value::Object(_)) => 7,
    }
}
