use std::collections::HashMap;
use std::time::Instant;

use lessonmd::query::{
    ChartKind, ChartSpec, CmpOp, Literal, MapSpec, Program, Stage, StageOp, Statement,
};

use crate::backend::{ChartBackend, MapBackend};
use crate::dataset::DatasetContext;
use crate::error::{ExecutionFault, Warning};
use crate::value::{Cell, Output, Table, fmt_number};

/// Per-submission evaluation scope: bindings created by `name = from ...`
/// statements. Isolated per run, so one exercise's edits can never leak
/// into another's visible dataset bindings.
struct Bindings {
    tables: HashMap<String, Table>,
}

impl Bindings {
    fn new() -> Self {
        Bindings {
            tables: HashMap::new(),
        }
    }
}

/// Run a parsed submission against the read-only dataset context.
/// Returns the Output of the last statement plus any warnings, or the
/// first fault encountered.
pub fn run(
    program: &Program,
    ctx: &DatasetContext,
    implicit_source: Option<&str>,
    charts: &dyn ChartBackend,
    maps: &dyn MapBackend,
    deadline: Option<Instant>,
) -> Result<(Output, Vec<Warning>), ExecutionFault> {
    let mut bindings = Bindings::new();
    let mut warnings = Vec::new();
    let mut last_output = None;

    for statement in &program.statements {
        check_deadline(deadline, statement.line)?;
        let output = run_statement(
            statement,
            ctx,
            &mut bindings,
            implicit_source,
            charts,
            maps,
            deadline,
            &mut warnings,
        )?;
        last_output = Some(output);
    }

    // The parser rejects empty programs, so there is always a last output.
    last_output
        .ok_or_else(|| ExecutionFault::new("empty submission", None))
        .map(|output| (output, warnings))
}

#[allow(clippy::too_many_arguments)]
fn run_statement(
    statement: &Statement,
    ctx: &DatasetContext,
    bindings: &mut Bindings,
    implicit_source: Option<&str>,
    charts: &dyn ChartBackend,
    maps: &dyn MapBackend,
    deadline: Option<Instant>,
    warnings: &mut Vec<Warning>,
) -> Result<Output, ExecutionFault> {
    let mut table = resolve_source(statement, ctx, bindings, implicit_source)?;

    for stage in &statement.pipeline.stages {
        check_deadline(deadline, stage.line)?;

        if stage.op.is_terminal() {
            // The parser guarantees a terminal stage is last and unbound.
            return run_terminal(stage, &table, charts, maps, warnings);
        }
        table = apply_stage(stage, table)?;
    }

    if let Some(name) = &statement.binding {
        if ctx.contains(name) {
            return Err(ExecutionFault::at_line(
                format!("cannot rebind source dataset '{}'", name),
                statement.line,
            ));
        }
        bindings.tables.insert(name.clone(), table.clone());
    }

    Ok(Output::Table(table))
}

fn resolve_source(
    statement: &Statement,
    ctx: &DatasetContext,
    bindings: &Bindings,
    implicit_source: Option<&str>,
) -> Result<Table, ExecutionFault> {
    let name = match statement.pipeline.source.as_deref().or(implicit_source) {
        Some(name) => name,
        None => {
            return Err(ExecutionFault::at_line(
                "no source dataset: start with 'from <dataset>' or bind the exercise \
                 to one with data=",
                statement.line,
            ));
        }
    };

    if let Some(table) = bindings.tables.get(name) {
        return Ok(table.clone());
    }
    if let Some(table) = ctx.get(name) {
        return Ok(table.as_ref().clone());
    }
    Err(ExecutionFault::at_line(
        format!("unknown dataset '{}'", name),
        statement.line,
    ))
}

fn check_deadline(deadline: Option<Instant>, line: usize) -> Result<(), ExecutionFault> {
    if let Some(deadline) = deadline {
        if Instant::now() > deadline {
            return Err(ExecutionFault::at_line(
                "submission exceeded its time budget",
                line,
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transform stages
// ---------------------------------------------------------------------------

fn apply_stage(stage: &Stage, table: Table) -> Result<Table, ExecutionFault> {
    match &stage.op {
        StageOp::Select(columns) => select(&table, columns, stage.line),
        StageOp::Filter {
            column,
            op,
            literal,
        } => filter(table, column, *op, literal, stage.line),
        StageOp::Sort { column, descending } => sort(table, column, *descending, stage.line),
        StageOp::Head(n) => {
            let mut table = table;
            table.rows.truncate(*n);
            Ok(table)
        }
        // Terminal stages are dispatched before apply_stage is reached.
        _ => Err(ExecutionFault::at_line(
            format!("'{}' cannot appear mid-pipeline", stage.op.keyword()),
            stage.line,
        )),
    }
}

fn require_column(table: &Table, name: &str, line: usize) -> Result<usize, ExecutionFault> {
    table.column_index(name).ok_or_else(|| {
        ExecutionFault::at_line(
            format!(
                "unknown column '{}' (available: {})",
                name,
                table.columns.join(", ")
            ),
            line,
        )
    })
}

fn select(table: &Table, columns: &[String], line: usize) -> Result<Table, ExecutionFault> {
    let indices: Vec<usize> = columns
        .iter()
        .map(|c| require_column(table, c, line))
        .collect::<Result<_, _>>()?;

    let rows = table
        .rows
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(Table {
        columns: columns.to_vec(),
        rows,
    })
}

fn filter(
    mut table: Table,
    column: &str,
    op: CmpOp,
    literal: &Literal,
    line: usize,
) -> Result<Table, ExecutionFault> {
    let idx = require_column(&table, column, line)?;
    table.rows.retain(|row| matches_literal(&row[idx], op, literal));
    Ok(table)
}

/// Compare a cell against a literal. Mismatched types never match an
/// ordering comparison; for equality they compare as unequal.
fn matches_literal(cell: &Cell, op: CmpOp, literal: &Literal) -> bool {
    let ordering = match (cell, literal) {
        (Cell::Number(a), Literal::Number(b)) => a.partial_cmp(b),
        (Cell::Str(a), Literal::Str(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    };

    match (op, ordering) {
        (CmpOp::Eq, Some(ord)) => ord.is_eq(),
        (CmpOp::Ne, Some(ord)) => !ord.is_eq(),
        (CmpOp::Gt, Some(ord)) => ord.is_gt(),
        (CmpOp::Ge, Some(ord)) => ord.is_ge(),
        (CmpOp::Lt, Some(ord)) => ord.is_lt(),
        (CmpOp::Le, Some(ord)) => ord.is_le(),
        (CmpOp::Ne, None) => true,
        (_, None) => false,
    }
}

fn sort(
    mut table: Table,
    column: &str,
    descending: bool,
    line: usize,
) -> Result<Table, ExecutionFault> {
    let idx = require_column(&table, column, line)?;
    // Stable sort; numbers order before strings.
    table.rows.sort_by(|a, b| {
        let ord = match (&a[idx], &b[idx]) {
            (Cell::Number(x), Cell::Number(y)) => {
                x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
            }
            (Cell::Str(x), Cell::Str(y)) => x.cmp(y),
            (Cell::Number(_), Cell::Str(_)) => std::cmp::Ordering::Less,
            (Cell::Str(_), Cell::Number(_)) => std::cmp::Ordering::Greater,
        };
        if descending { ord.reverse() } else { ord }
    });
    Ok(table)
}

// ---------------------------------------------------------------------------
// Terminal stages
// ---------------------------------------------------------------------------

fn run_terminal(
    stage: &Stage,
    table: &Table,
    charts: &dyn ChartBackend,
    maps: &dyn MapBackend,
    warnings: &mut Vec<Warning>,
) -> Result<Output, ExecutionFault> {
    match &stage.op {
        StageOp::Summarize => Ok(Output::Text(summarize(table))),
        StageOp::Plot(spec) => {
            check_chart_spec(spec, table, stage.line, warnings)?;
            let image = charts
                .static_image(spec, table)
                .map_err(|e| ExecutionFault::at_line(e.to_string(), stage.line))?;
            Ok(Output::Image(image))
        }
        StageOp::Chart(spec) => {
            check_chart_spec(spec, table, stage.line, warnings)?;
            let handle = charts
                .interactive(spec, table)
                .map_err(|e| ExecutionFault::at_line(e.to_string(), stage.line))?;
            Ok(Output::Widget(handle))
        }
        StageOp::Map(spec) => run_map(spec, table, maps, stage.line),
        _ => Err(ExecutionFault::at_line(
            format!("'{}' is not a terminal stage", stage.op.keyword()),
            stage.line,
        )),
    }
}

fn require_numeric(
    table: &Table,
    name: &str,
    role: &str,
    line: usize,
) -> Result<Vec<f64>, ExecutionFault> {
    require_column(table, name, line)?;
    table.numeric_column(name).ok_or_else(|| {
        ExecutionFault::at_line(
            format!("column '{}' contains non-numeric values; cannot be used as {}", name, role),
            line,
        )
    })
}

/// Validate chart aesthetics against the table the spec will be drawn from.
/// A `popup=` aesthetic is not part of the chart grammar: the layer is
/// dropped with a warning and rendering continues (degraded success).
fn check_chart_spec(
    spec: &ChartSpec,
    table: &Table,
    line: usize,
    warnings: &mut Vec<Warning>,
) -> Result<(), ExecutionFault> {
    require_column(table, &spec.x, line)?;
    require_column(table, &spec.y, line)?;
    if let Some(color) = &spec.color {
        require_column(table, color, line)?;
    }

    require_numeric(table, &spec.y, "the y aesthetic", line)?;
    if matches!(spec.kind, ChartKind::Scatter | ChartKind::Line) {
        require_numeric(table, &spec.x, "the x aesthetic", line)?;
    }

    if spec.popup.is_some() {
        warnings.push(Warning::at_line(
            format!(
                "the popup aesthetic is not supported by {} charts; the layer was dropped",
                spec.kind.name()
            ),
            line,
        ));
    }
    Ok(())
}

fn run_map(
    spec: &MapSpec,
    table: &Table,
    maps: &dyn MapBackend,
    line: usize,
) -> Result<Output, ExecutionFault> {
    let lon = require_numeric(table, &spec.lon, "longitude", line)?;
    let lat = require_numeric(table, &spec.lat, "latitude", line)?;
    let popup = match &spec.popup {
        Some(column) => {
            let idx = require_column(table, column, line)?;
            Some(
                table
                    .rows
                    .iter()
                    .map(|row| row[idx].to_string())
                    .collect::<Vec<_>>(),
            )
        }
        None => None,
    };

    let mut canvas = maps.begin(table);
    canvas.add_markers(lon, lat, popup);
    canvas.add_tiles(spec.tiles.as_deref().unwrap_or("default"));
    if let Some(caption) = &spec.caption {
        canvas.add_caption(caption);
    }
    let handle = canvas
        .finish()
        .map_err(|e| ExecutionFault::at_line(e.to_string(), line))?;
    Ok(Output::Widget(handle))
}

/// Plain-text table summary for the `summarize` stage.
fn summarize(table: &Table) -> String {
    let mut text = format!(
        "{} rows x {} columns",
        table.row_count(),
        table.columns.len()
    );
    for column in &table.columns {
        match table.numeric_column(column) {
            Some(values) if !values.is_empty() => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                text.push_str(&format!(
                    "\n  {}: min {}, mean {}, max {}",
                    column,
                    fmt_number(min),
                    fmt_mean(mean),
                    fmt_number(max)
                ));
            }
            _ => {
                text.push_str(&format!("\n  {}: (text)", column));
            }
        }
    }
    text
}

fn fmt_mean(mean: f64) -> String {
    if mean == mean.floor() {
        fmt_number(mean)
    } else {
        format!("{:.2}", mean)
    }
}
