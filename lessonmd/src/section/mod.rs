use std::ops::Range;

use crate::document::NarrativeNode;

/// A teaching section opened by a level-1 Markdown heading.
/// Sections are the unit of progressive unlocking.
#[derive(Debug, Clone)]
pub struct Section {
    /// The section title (from heading text), whitespace-normalized.
    /// Doubles as the section identifier; duplicates are a load error.
    pub title: String,
    /// Body content in document order: narrative interleaved with exercises.
    pub nodes: Vec<SectionNode>,
    /// Byte span in source for error reporting.
    pub span: Range<usize>,
}

impl Section {
    /// Iterate over the exercise blocks declared in this section.
    pub fn exercises(&self) -> impl Iterator<Item = &ExerciseDecl> {
        self.nodes.iter().filter_map(|node| match node {
            SectionNode::Exercise(decl) => Some(decl),
            SectionNode::Narrative(_) => None,
        })
    }
}

/// One element of a section body.
#[derive(Debug, Clone)]
pub enum SectionNode {
    Narrative(NarrativeNode),
    Exercise(ExerciseDecl),
}

/// An editable exercise block, declared as a fenced code block whose info
/// string starts with `exercise`.
#[derive(Debug, Clone)]
pub struct ExerciseDecl {
    /// Exercise identifier: `id=` from the info string, or
    /// `<section-ordinal>.<exercise-ordinal>` (e.g. "2.1") by default.
    pub id: String,
    /// Implicit source dataset (`data=` from the info string). Pipelines in
    /// this block that omit `from` read from this dataset.
    pub source: Option<String>,
    /// The author-default code, restored on reset.
    pub code: String,
    /// Byte span of the fence in source.
    pub span: Range<usize>,
}

/// A dataset declaration: a level-1 section titled `Dataset: <Name>` whose
/// body is a single Markdown table. Cell coercion (number vs. text) happens
/// when the session materializes the dataset context.
#[derive(Debug, Clone)]
pub struct DatasetDecl {
    pub name: String,
    pub columns: Vec<String>,
    /// Raw cell text, one Vec per row, each the same length as `columns`.
    pub rows: Vec<Vec<String>>,
    /// Byte span of the declaring section in source.
    pub span: Range<usize>,
}
