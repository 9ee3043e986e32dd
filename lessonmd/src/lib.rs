pub mod document;
pub mod parser;
pub mod query;
pub mod section;

use crate::section::{DatasetDecl, Section};

/// A parsed lesson document.
#[derive(Debug, Clone)]
pub struct Lesson {
    /// Teaching sections, in document order.
    pub sections: Vec<Section>,
    /// Dataset declarations (`# Dataset: Name` sections), in document order.
    pub datasets: Vec<DatasetDecl>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

impl Lesson {
    /// Look up a dataset declaration by name.
    pub fn dataset(&self, name: &str) -> Option<&DatasetDecl> {
        self.datasets.iter().find(|d| d.name == name)
    }
}
