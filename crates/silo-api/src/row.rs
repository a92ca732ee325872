//! Row transformations shared by every backend.
//!
//! Update merging and field projection are part of the contract, so backends
//! delegate to these helpers instead of reimplementing them.

use crate::constraint::resolve_field;
use crate::{Row, Value, ID_FIELD};

/// Merge a partial update payload into a stored row.
///
/// Fields present in `data` replace stored fields, fields set to
/// [`Value::Delete`] are removed, and everything else survives. The id field
/// is immutable; payload entries for it are ignored.
pub fn merge_row(stored: &mut Row, data: Row) {
    for (field, value) in data {
        if field == ID_FIELD {
            continue;
        }
        if value.is_delete() {
            stored.remove(&field);
        } else {
            stored.insert(field, value);
        }
    }
}

/// Project a row to the requested fields.
///
/// The id field gets no special treatment here: like any other key it
/// appears only when requested. Requested fields the row does not carry are
/// absent from the result, not null. [`crate::ID_PATH`] resolves to the id
/// field.
pub fn project_row(row: &Row, fields: &[String]) -> Row {
    let mut projected = Row::new();
    for field in fields {
        let field = resolve_field(field);
        if let Some(value) = row.get(field) {
            projected.insert(field.to_string(), value.clone());
        }
    }
    projected
}

/// Drop delete sentinels from a row. Create payloads are sanitized with this
/// before storage, since the sentinel is only meaningful when merging.
pub fn strip_sentinels(row: &mut Row) {
    row.retain(|_, v| !v.is_delete());
}
