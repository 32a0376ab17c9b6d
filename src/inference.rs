//! # Schema Inference
//!
//! Derives the set of user-defined field names from a batch of loosely-typed
//! remote records, and projects every value to text for storage.
//!
//! ## Value Projection
//!
//! | JSON Type       | Stored As                    |
//! |-----------------|------------------------------|
//! | String          | the string itself            |
//! | Number          | its decimal representation   |
//! | Boolean         | `true` / `false`             |
//! | Object / Array  | compact JSON text            |
//! | Null / absent   | SQL NULL                     |

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One remote row: field name to untyped value
pub type Record = Map<String, Value>;

/// Distinct user-defined field names observed across a batch.
/// Ordered so the column order chosen at table creation is deterministic.
pub type FieldSet = BTreeSet<String>;

/// Provider-managed fields, compared case-insensitively. `id` also covers
/// any remote field that would collide with the synthetic identity column.
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "createdat",
    "updatedat",
    "created_at",
    "updated_at",
    "createdtime",
];

/// Whether `name` is a provider system field
pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS
        .iter()
        .any(|system| system.eq_ignore_ascii_case(name))
}

/// Union of all non-system keys across `records`
pub fn infer_fields(records: &[Record]) -> FieldSet {
    records
        .iter()
        .flat_map(|record| record.keys())
        .filter(|key| !is_system_field(key))
        .cloned()
        .collect()
}

/// Projects a remote value to its cached text form
pub fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
