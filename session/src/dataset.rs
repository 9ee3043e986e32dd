use std::collections::HashMap;
use std::sync::Arc;

use lessonmd::section::DatasetDecl;

use crate::value::{Cell, Table};

/// The fixed, read-only mapping from name to tabular dataset, populated
/// once at session start and shared by all exercise runs. Tables live
/// behind `Arc` so parallel submissions can share them without copying.
#[derive(Debug, Clone, Default)]
pub struct DatasetContext {
    tables: HashMap<String, Arc<Table>>,
}

impl DatasetContext {
    /// Materialize the context from parsed declarations, coercing cell
    /// text to numbers where possible. Shape was validated at parse time.
    pub fn from_decls(decls: &[DatasetDecl]) -> Self {
        let mut tables = HashMap::new();
        for decl in decls {
            let rows = decl
                .rows
                .iter()
                .map(|row| row.iter().map(|text| Cell::parse(text)).collect())
                .collect();
            let table = Table {
                columns: decl.columns.clone(),
                rows,
            };
            tables.insert(decl.name.clone(), Arc::new(table));
        }
        DatasetContext { tables }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Table>> {
        self.tables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Declared dataset names, sorted for stable presentation.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
