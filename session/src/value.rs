use std::fmt;

use crate::backend::WidgetHandle;

/// A single table cell. Dataset cells are coerced once at load: text that
/// parses as a number becomes Number, everything else stays Str.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Str(String),
}

impl Cell {
    /// Coerce raw cell text from a dataset declaration.
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(n) => Cell::Number(n),
            Err(_) => Cell::Str(text.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Str(_) => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{}", fmt_number(*n)),
            Cell::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Format a number the way it was most likely written: integers without a
/// trailing fraction.
pub(crate) fn fmt_number(n: f64) -> String {
    if n.is_finite() && n == n.floor() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// A named-column table. Rows always have exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// All values of one column as numbers; None if the column is missing
    /// or any cell is not numeric.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(name)?;
        self.rows.iter().map(|row| row[idx].as_number()).collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|")?;
        for column in &self.columns {
            write!(f, " {} |", column)?;
        }
        writeln!(f)?;
        write!(f, "|")?;
        for _ in &self.columns {
            write!(f, "---|")?;
        }
        writeln!(f)?;
        for row in &self.rows {
            write!(f, "|")?;
            for cell in row {
                write!(f, " {} |", cell)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A static rendered image produced by the chart collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    /// Image format, e.g. "svg".
    pub format: &'static str,
    pub data: String,
}

impl fmt::Display for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} image, {} bytes)", self.format, self.data.len())
    }
}

/// The result of a successful exercise run, replaced on each re-run.
#[derive(Debug, Clone)]
pub enum Output {
    Text(String),
    Table(Table),
    Image(ImageData),
    /// Opaque handle from a charting/mapping collaborator; the session only
    /// ever calls `render()` on it.
    Widget(WidgetHandle),
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Text(s) => write!(f, "{}", s),
            Output::Table(t) => write!(f, "{}", t),
            Output::Image(img) => write!(f, "{}", img),
            Output::Widget(handle) => write!(f, "{}", handle.render()),
        }
    }
}
