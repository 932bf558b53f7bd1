//! Object dictionary: maps dictionary object ids to table definitions.
//!
//! Catalog bootstrap against a live database is an external concern; the
//! dictionary here is populated from configuration (or by whatever loaded
//! the schema) and consulted on every row change. DDL boundaries flush the
//! resolution cache so renamed or altered tables stop resolving stale.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub owner: String,
    pub name: String,
    /// Column names in declaration order.
    pub columns: Vec<String>,
}

impl TableDef {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

/// Dictionary of replicated tables keyed by object id.
#[derive(Debug, Default, Clone)]
pub struct Dictionary {
    tables: HashMap<u32, TableDef>,
    /// Stale after DDL until the owner reloads definitions.
    flushed: bool,
}

impl Dictionary {
    pub fn new(tables: HashMap<u32, TableDef>) -> Self {
        Self {
            tables,
            flushed: false,
        }
    }

    /// Resolve an object id; `None` for tables outside the replicated set.
    #[must_use]
    pub fn resolve(&self, object_id: u32) -> Option<&TableDef> {
        self.tables.get(&object_id)
    }

    /// Column name for `index`, or a positional fallback.
    #[must_use]
    pub fn column_name(&self, object_id: u32, index: u16) -> String {
        self.resolve(object_id)
            .and_then(|t| t.columns.get(index as usize))
            .cloned()
            .unwrap_or_else(|| format!("COL{index}"))
    }

    /// Drop cached resolutions at a DDL boundary.
    pub fn flush(&mut self) {
        debug!(tables = self.tables.len(), "dictionary flushed at ddl boundary");
        self.flushed = true;
    }

    /// Replace the table set (schema reload after DDL).
    pub fn reload(&mut self, tables: HashMap<u32, TableDef>) {
        self.tables = tables;
        self.flushed = false;
    }

    #[must_use]
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict() -> Dictionary {
        let mut tables = HashMap::new();
        tables.insert(
            777,
            TableDef {
                owner: "USR1".into(),
                name: "ADAM".into(),
                columns: vec!["A".into(), "B".into(), "C".into()],
            },
        );
        Dictionary::new(tables)
    }

    #[test]
    fn resolve_and_column_names() {
        let d = dict();
        assert_eq!(d.resolve(777).unwrap().qualified_name(), "USR1.ADAM");
        assert_eq!(d.column_name(777, 1), "B");
        assert_eq!(d.column_name(777, 9), "COL9");
        assert!(d.resolve(1).is_none());
    }

    #[test]
    fn flush_and_reload() {
        let mut d = dict();
        assert!(!d.is_flushed());
        d.flush();
        assert!(d.is_flushed());
        d.reload(HashMap::new());
        assert!(!d.is_flushed());
        assert!(d.is_empty());
    }
}
