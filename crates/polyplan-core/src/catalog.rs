//! # Catalog Interface
//!
//! The catalog supplies table metadata: row types, statistics, and the
//! storage engine a table lives in. The trait is intentionally minimal and
//! sits behind a trait object so that production backends can plug in; the
//! `InMemoryCatalog` is the programmatic implementation used in tests and
//! development.

use crate::algebra::TableRef;
use crate::stats::Statistics;
use crate::types::RowType;
use std::collections::HashMap;

/// Schema and statistics provider.
pub trait Catalog: Send + Sync {
    fn table_row_type(&self, table: &TableRef) -> Option<RowType>;

    fn table_stats(&self, table: &TableRef) -> Option<Statistics>;

    /// The storage engine that owns the table, when it is not the default
    /// store. Adapter rules use this to decide whether their convention
    /// applies.
    fn table_source(&self, table: &TableRef) -> Option<String> {
        table.source.clone()
    }
}

/// In-memory catalog for testing and development, keyed by qualified table
/// name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    row_types: HashMap<String, RowType>,
    stats: HashMap<String, Statistics>,
    sources: HashMap<String, String>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: &TableRef, row_type: RowType, stats: Statistics) {
        let key = table.qualified_name();
        self.row_types.insert(key.clone(), row_type);
        self.stats.insert(key.clone(), stats);
        if let Some(source) = &table.source {
            self.sources.insert(key, source.clone());
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn table_row_type(&self, table: &TableRef) -> Option<RowType> {
        self.row_types.get(&table.qualified_name()).cloned()
    }

    fn table_stats(&self, table: &TableRef) -> Option<Statistics> {
        self.stats.get(&table.qualified_name()).cloned()
    }

    fn table_source(&self, table: &TableRef) -> Option<String> {
        table
            .source
            .clone()
            .or_else(|| self.sources.get(&table.qualified_name()).cloned())
    }
}
