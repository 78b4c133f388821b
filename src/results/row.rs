use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::types::RowValues;

/// One row as column name -> value, in the result set's column declaration order.
pub type RowMap = IndexMap<String, RowValues>;

/// Rows keyed by the value of one column; a later row with the same key replaces the earlier one.
pub type KeyedRows = IndexMap<RowKey, RowMap>;

/// Hashable wrapper around a column value used as a map key.
///
/// Floats compare by bit pattern and JSON by its serialized text, so every `RowValues` can
/// serve as a key.
#[derive(Debug, Clone)]
pub struct RowKey(pub RowValues);

impl RowKey {
    #[must_use]
    pub fn value(&self) -> &RowValues {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> RowValues {
        self.0
    }
}

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (RowValues::Float(a), RowValues::Float(b)) => a.to_bits() == b.to_bits(),
            (RowValues::JSON(a), RowValues::JSON(b)) => a.to_string() == b.to_string(),
            (a, b) => a == b,
        }
    }
}

impl Eq for RowKey {}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            RowValues::Int(i) => i.hash(state),
            RowValues::Float(f) => f.to_bits().hash(state),
            RowValues::Text(s) => s.hash(state),
            RowValues::Bool(b) => b.hash(state),
            RowValues::Timestamp(ts) => ts.hash(state),
            RowValues::Null => {}
            RowValues::JSON(json) => json.to_string().hash(state),
            RowValues::Blob(bytes) => bytes.hash(state),
        }
    }
}

impl From<RowValues> for RowKey {
    fn from(value: RowValues) -> Self {
        RowKey(value)
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        RowKey(RowValues::Int(value))
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        RowKey(RowValues::Text(value.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_equal_values_collide() {
        let mut keyed = KeyedRows::new();
        keyed.insert(RowKey::from(1), RowMap::new());
        keyed.insert(RowKey(RowValues::Int(1)), RowMap::new());
        keyed.insert(RowKey(RowValues::Float(1.0)), RowMap::new());
        assert_eq!(keyed.len(), 2);
    }

    #[test]
    fn json_keys_compare_by_text() {
        let a = RowKey(RowValues::JSON(serde_json::json!({"a": 1})));
        let b = RowKey(RowValues::JSON(serde_json::json!({"a": 1})));
        assert_eq!(a, b);
    }
}
