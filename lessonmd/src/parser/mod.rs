pub mod error;
mod structural;

pub use error::ParseError;

use crate::Lesson;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Parse the source Markdown into a complete, validated Lesson.
    /// Validation covers duplicate section/dataset/exercise identifiers,
    /// dataset table shape, and dataset references in default exercise code.
    pub fn parse(&self) -> Result<Lesson, Vec<ParseError>> {
        structural::parse_lesson(&self.source, self.file_id)
    }
}
