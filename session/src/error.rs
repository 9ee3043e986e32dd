use std::fmt;

use lessonmd::parser::ParseError;
use thiserror::Error;

/// Errors that abort session start. All other failures are recovered at
/// exercise-block granularity and never terminate the session.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed lesson document: {}", summarize(.0))]
    Parse(Vec<ParseError>),

    #[error("lesson document has no sections")]
    EmptyDocument,

    #[error("cannot read lesson document: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// The underlying span-carrying diagnostics, when parsing failed.
    pub fn parse_errors(&self) -> &[ParseError] {
        match self {
            LoadError::Parse(errors) => errors,
            _ => &[],
        }
    }
}

fn summarize(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Invalid requests against a live session. Lock and exercise state are
/// left untouched when these are returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown section '{0}'")]
    UnknownSection(String),

    #[error("unknown exercise '{0}'")]
    UnknownExercise(String),
}

/// A failed exercise run: parse error, unknown column or dataset, backend
/// refusal, or an exceeded time budget. Reported to the learner inline;
/// terminal for the submission, never for the session.
#[derive(Debug, Clone, Error)]
pub struct ExecutionFault {
    pub message: String,
    /// 1-based line within the submitted code fragment, when known.
    pub line: Option<usize>,
}

impl ExecutionFault {
    pub fn new(message: impl Into<String>, line: Option<usize>) -> Self {
        ExecutionFault {
            message: message.into(),
            line,
        }
    }

    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Self::new(message, Some(line))
    }
}

impl fmt::Display for ExecutionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<lessonmd::query::QueryError> for ExecutionFault {
    fn from(err: lessonmd::query::QueryError) -> Self {
        ExecutionFault {
            message: err.message,
            line: Some(err.line),
        }
    }
}

/// A non-fatal observation from a run that still produced an Output
/// (degraded success, e.g. an aesthetic the chart kind cannot honor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub line: Option<usize>,
}

impl Warning {
    pub fn at_line(message: impl Into<String>, line: usize) -> Self {
        Warning {
            message: message.into(),
            line: Some(line),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}
