//! Host-variable parameter sets.

use rustc_hash::FxHashMap;

use crate::value::{SqlType, Value};

/// A bound parameter value.
///
/// Besides concrete scalars and null, two reference placeholders exist for
/// the batch loader: they name a column of the input file, and the loader
/// replaces them with the concrete value of each row before execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Value(Value),
    Null,
    ReferenceColumnPosition(usize),
    ReferenceColumnName(String),
}

impl ParameterValue {
    /// Whether this entry still needs per-row expansion by the loader.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ParameterValue::ReferenceColumnPosition(_) | ParameterValue::ReferenceColumnName(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    pub sql_type: SqlType,
    pub value: ParameterValue,
}

/// Mapping from parameter name to typed value. Cloneable: the loader clones
/// the template once per row before expanding reference placeholders.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    entries: FxHashMap<String, ParameterEntry>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        let sql_type = value.sql_type();
        self.entries.insert(
            name.into(),
            ParameterEntry {
                sql_type,
                value: ParameterValue::Value(value),
            },
        );
    }

    pub fn set_null(&mut self, name: impl Into<String>, sql_type: SqlType) {
        self.entries.insert(
            name.into(),
            ParameterEntry {
                sql_type,
                value: ParameterValue::Null,
            },
        );
    }

    pub fn set_reference_column_position(
        &mut self,
        name: impl Into<String>,
        sql_type: SqlType,
        position: usize,
    ) {
        self.entries.insert(
            name.into(),
            ParameterEntry {
                sql_type,
                value: ParameterValue::ReferenceColumnPosition(position),
            },
        );
    }

    pub fn set_reference_column_name(
        &mut self,
        name: impl Into<String>,
        sql_type: SqlType,
        column: impl Into<String>,
    ) {
        self.entries.insert(
            name.into(),
            ParameterEntry {
                sql_type,
                value: ParameterValue::ReferenceColumnName(column.into()),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ParameterEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry is a loader reference placeholder.
    pub fn has_references(&self) -> bool {
        self.entries.values().any(|e| e.value.is_reference())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_detection() {
        let mut params = ParameterSet::new();
        params.set_value("p0", Value::Int4(1));
        assert!(!params.has_references());
        params.set_reference_column_name("p1", SqlType::text(), "c1");
        assert!(params.has_references());

        let clone = params.clone();
        assert_eq!(clone.len(), 2);
        assert!(clone.get("p1").unwrap().value.is_reference());
    }
}
