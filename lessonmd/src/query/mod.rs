pub mod parser;

pub use parser::{QueryError, parse_program};

/// A parsed exercise submission: one or more pipeline statements.
/// The value of the last statement is the submission's output.
#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    /// Names read as pipeline sources anywhere in the program, in order.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .filter_map(|s| s.pipeline.source.as_deref())
    }
}

/// `name = from ...` binds the pipeline result in submission-local scope;
/// a bare pipeline just produces a value.
#[derive(Debug, Clone)]
pub struct Statement {
    pub binding: Option<String>,
    pub pipeline: Pipeline,
    /// 1-based line of the statement's first stage.
    pub line: usize,
}

/// A source followed by transform stages. `source == None` means the
/// exercise block's implicit `data=` dataset.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub source: Option<String>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub op: StageOp,
    /// 1-based line the stage was written on.
    pub line: usize,
}

#[derive(Debug, Clone)]
pub enum StageOp {
    /// `select Age, Income`
    Select(Vec<String>),
    /// `filter Age > 30`
    Filter {
        column: String,
        op: CmpOp,
        literal: Literal,
    },
    /// `sort Income desc`
    Sort { column: String, descending: bool },
    /// `head 10`
    Head(usize),
    /// Terminal: textual summary of the current table.
    Summarize,
    /// Terminal: static chart image.
    Plot(ChartSpec),
    /// Terminal: interactive chart widget.
    Chart(ChartSpec),
    /// Terminal: interactive point map widget.
    Map(MapSpec),
}

impl StageOp {
    /// Terminal stages end a pipeline; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageOp::Summarize | StageOp::Plot(_) | StageOp::Chart(_) | StageOp::Map(_)
        )
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            StageOp::Select(_) => "select",
            StageOp::Filter { .. } => "filter",
            StageOp::Sort { .. } => "sort",
            StageOp::Head(_) => "head",
            StageOp::Summarize => "summarize",
            StageOp::Plot(_) => "plot",
            StageOp::Chart(_) => "chart",
            StageOp::Map(_) => "map",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Scatter,
    Line,
    Bar,
}

impl ChartKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChartKind::Scatter => "scatter",
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
        }
    }
}

/// Declarative chart description handed to the chart collaborator.
#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    pub y: String,
    pub color: Option<String>,
    /// Accepted by the parser, unsupported by charts; execution degrades it
    /// to a warning and drops the layer.
    pub popup: Option<String>,
    pub title: Option<String>,
}

/// Declarative map description handed to the map collaborator.
#[derive(Debug, Clone)]
pub struct MapSpec {
    pub lon: String,
    pub lat: String,
    pub popup: Option<String>,
    /// Named tile provider; the collaborator's default when absent.
    pub tiles: Option<String>,
    pub caption: Option<String>,
}
