use std::fmt;

use crate::query::{
    ChartKind, ChartSpec, CmpOp, Literal, MapSpec, Pipeline, Program, Stage, StageOp, Statement,
};

/// A query parse failure, located by 1-based line within the code fragment.
#[derive(Debug, Clone)]
pub struct QueryError {
    pub message: String,
    pub line: usize,
}

impl QueryError {
    fn new(message: impl Into<String>, line: usize) -> Self {
        QueryError {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for QueryError {}

const STAGE_KEYWORDS: &[&str] = &[
    "select",
    "filter",
    "sort",
    "head",
    "summarize",
    "plot",
    "chart",
    "map",
];

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Comma,
    Assign,
    Cmp(CmpOp),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{}'", s),
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Comma => "','".to_string(),
            Token::Assign => "'='".to_string(),
            Token::Cmp(_) => "comparison operator".to_string(),
        }
    }
}

fn lex(line_text: &str, line: usize) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = line_text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '"' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '"' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(QueryError::new("unterminated string literal", line));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Eq));
                    i += 2;
                } else {
                    tokens.push(Token::Assign);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err(QueryError::new("unexpected '!' (did you mean '!='?)", line));
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Lt));
                    i += 1;
                }
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| QueryError::new(format!("invalid number '{}'", text), line))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(QueryError::new(
                    format!("unexpected character '{}'", other),
                    line,
                ));
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Statement grouping
// ---------------------------------------------------------------------------

/// Parse an exercise code fragment into a Program.
///
/// Each non-empty line is either a statement start (`from <name>` or
/// `<name> = from <name>`) or a stage of the current pipeline. The very
/// first statement may omit its `from` line and start directly with a
/// stage, reading from the exercise block's implicit dataset.
pub fn parse_program(code: &str) -> Result<Program, QueryError> {
    let mut statements: Vec<Statement> = Vec::new();
    let mut current: Option<Statement> = None;

    for (idx, raw) in code.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        let tokens = lex(text, line)?;
        if tokens.is_empty() {
            continue;
        }

        // Binding form: `name = from <source>`
        if let (Some(Token::Ident(name)), Some(Token::Assign)) = (tokens.first(), tokens.get(1)) {
            if STAGE_KEYWORDS.contains(&name.as_str()) || name == "from" {
                return Err(QueryError::new(
                    format!("'{}' is a reserved word and cannot be bound", name),
                    line,
                ));
            }
            let source = parse_from(&tokens[2..], line)?;
            if let Some(stmt) = current.take() {
                statements.push(stmt);
            }
            current = Some(Statement {
                binding: Some(name.clone()),
                pipeline: Pipeline {
                    source: Some(source),
                    stages: Vec::new(),
                },
                line,
            });
            continue;
        }

        // Source form: `from <source>`
        if matches!(tokens.first(), Some(Token::Ident(kw)) if kw == "from") {
            let source = parse_from(&tokens, line)?;
            if let Some(stmt) = current.take() {
                statements.push(stmt);
            }
            current = Some(Statement {
                binding: None,
                pipeline: Pipeline {
                    source: Some(source),
                    stages: Vec::new(),
                },
                line,
            });
            continue;
        }

        // Stage line.
        let stage = parse_stage(&tokens, line)?;
        match current.as_mut() {
            None => {
                // Implicit-source pipeline: only valid as the first statement.
                if !statements.is_empty() {
                    return Err(QueryError::new(
                        format!(
                            "'{}' does not continue a pipeline; start one with 'from <dataset>'",
                            stage.op.keyword()
                        ),
                        line,
                    ));
                }
                current = Some(Statement {
                    binding: None,
                    pipeline: Pipeline {
                        source: None,
                        stages: vec![stage],
                    },
                    line,
                });
            }
            Some(stmt) => {
                if let Some(last) = stmt.pipeline.stages.last() {
                    if last.op.is_terminal() {
                        return Err(QueryError::new(
                            format!(
                                "nothing may follow '{}'; start a new pipeline with 'from'",
                                last.op.keyword()
                            ),
                            line,
                        ));
                    }
                }
                if stmt.binding.is_some() && stage.op.is_terminal() {
                    return Err(QueryError::new(
                        format!(
                            "cannot bind the result of '{}' to a name",
                            stage.op.keyword()
                        ),
                        line,
                    ));
                }
                stmt.pipeline.stages.push(stage);
            }
        }
    }

    if let Some(stmt) = current.take() {
        statements.push(stmt);
    }

    if statements.is_empty() {
        return Err(QueryError::new("empty submission", 1));
    }

    Ok(Program { statements })
}

fn parse_from(tokens: &[Token], line: usize) -> Result<String, QueryError> {
    match tokens {
        [Token::Ident(kw), Token::Ident(name)] if kw == "from" => Ok(name.clone()),
        [Token::Ident(kw)] if kw == "from" => {
            Err(QueryError::new("expected a dataset name after 'from'", line))
        }
        [Token::Ident(kw), ..] if kw == "from" => Err(QueryError::new(
            "expected end of line after the dataset name",
            line,
        )),
        _ => Err(QueryError::new("expected 'from <dataset>'", line)),
    }
}

// ---------------------------------------------------------------------------
// Stage parsing
// ---------------------------------------------------------------------------

fn parse_stage(tokens: &[Token], line: usize) -> Result<Stage, QueryError> {
    let Some(Token::Ident(keyword)) = tokens.first() else {
        return Err(QueryError::new(
            format!("expected a stage keyword, found {}", tokens[0].describe()),
            line,
        ));
    };
    let rest = &tokens[1..];

    let op = match keyword.as_str() {
        "select" => parse_select(rest, line)?,
        "filter" => parse_filter(rest, line)?,
        "sort" => parse_sort(rest, line)?,
        "head" => parse_head(rest, line)?,
        "summarize" => {
            if !rest.is_empty() {
                return Err(QueryError::new("'summarize' takes no arguments", line));
            }
            StageOp::Summarize
        }
        "plot" => StageOp::Plot(parse_chart_spec(rest, line)?),
        "chart" => StageOp::Chart(parse_chart_spec(rest, line)?),
        "map" => StageOp::Map(parse_map_spec(rest, line)?),
        other => {
            return Err(QueryError::new(
                format!("unknown stage '{}'", other),
                line,
            ));
        }
    };

    Ok(Stage { op, line })
}

fn parse_select(tokens: &[Token], line: usize) -> Result<StageOp, QueryError> {
    let mut columns = Vec::new();
    let mut expect_column = true;
    for token in tokens {
        match (expect_column, token) {
            (true, Token::Ident(name)) => {
                columns.push(name.clone());
                expect_column = false;
            }
            (false, Token::Comma) => expect_column = true,
            _ => {
                return Err(QueryError::new(
                    format!("unexpected {} in 'select'", token.describe()),
                    line,
                ));
            }
        }
    }
    if columns.is_empty() || expect_column {
        return Err(QueryError::new(
            "'select' expects a comma-separated list of column names",
            line,
        ));
    }
    Ok(StageOp::Select(columns))
}

fn parse_filter(tokens: &[Token], line: usize) -> Result<StageOp, QueryError> {
    match tokens {
        [Token::Ident(column), Token::Cmp(op), literal] => {
            let literal = match literal {
                Token::Number(n) => Literal::Number(*n),
                Token::Str(s) => Literal::Str(s.clone()),
                other => {
                    return Err(QueryError::new(
                        format!(
                            "'filter' expects a number or quoted string, found {}",
                            other.describe()
                        ),
                        line,
                    ));
                }
            };
            Ok(StageOp::Filter {
                column: column.clone(),
                op: *op,
                literal,
            })
        }
        [_, Token::Assign, ..] => Err(QueryError::new(
            "use '==' to compare values in 'filter'",
            line,
        )),
        _ => Err(QueryError::new(
            "'filter' expects '<column> <op> <value>'",
            line,
        )),
    }
}

fn parse_sort(tokens: &[Token], line: usize) -> Result<StageOp, QueryError> {
    match tokens {
        [Token::Ident(column)] => Ok(StageOp::Sort {
            column: column.clone(),
            descending: false,
        }),
        [Token::Ident(column), Token::Ident(dir)] if dir == "asc" || dir == "desc" => {
            Ok(StageOp::Sort {
                column: column.clone(),
                descending: dir == "desc",
            })
        }
        _ => Err(QueryError::new(
            "'sort' expects '<column> [asc|desc]'",
            line,
        )),
    }
}

fn parse_head(tokens: &[Token], line: usize) -> Result<StageOp, QueryError> {
    match tokens {
        [Token::Number(n)] if *n >= 0.0 && n.fract() == 0.0 => Ok(StageOp::Head(*n as usize)),
        _ => Err(QueryError::new(
            "'head' expects a non-negative whole number",
            line,
        )),
    }
}

/// Parse `key=value` pairs following a stage keyword.
fn parse_kv_pairs(tokens: &[Token], line: usize) -> Result<Vec<(String, String)>, QueryError> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let (Some(Token::Ident(key)), Some(Token::Assign)) = (tokens.get(i), tokens.get(i + 1))
        else {
            return Err(QueryError::new(
                format!("expected 'key=value', found {}", tokens[i].describe()),
                line,
            ));
        };
        let value = match tokens.get(i + 2) {
            Some(Token::Ident(v)) => v.clone(),
            Some(Token::Str(v)) => v.clone(),
            _ => {
                return Err(QueryError::new(
                    format!(
                        "expected a column name or quoted string after '{}='",
                        key
                    ),
                    line,
                ));
            }
        };
        pairs.push((key.clone(), value));
        i += 3;
    }
    Ok(pairs)
}

fn parse_chart_spec(tokens: &[Token], line: usize) -> Result<ChartSpec, QueryError> {
    let Some(Token::Ident(kind_name)) = tokens.first() else {
        return Err(QueryError::new(
            "expected a chart kind: scatter, line, or bar",
            line,
        ));
    };
    let kind = match kind_name.as_str() {
        "scatter" => ChartKind::Scatter,
        "line" => ChartKind::Line,
        "bar" => ChartKind::Bar,
        other => {
            return Err(QueryError::new(
                format!("unknown chart kind '{}' (expected scatter, line, or bar)", other),
                line,
            ));
        }
    };

    let mut x = None;
    let mut y = None;
    let mut color = None;
    let mut popup = None;
    let mut title = None;
    for (key, value) in parse_kv_pairs(&tokens[1..], line)? {
        match key.as_str() {
            "x" => x = Some(value),
            "y" => y = Some(value),
            "color" => color = Some(value),
            "popup" => popup = Some(value),
            "title" => title = Some(value),
            other => {
                return Err(QueryError::new(
                    format!("unknown chart aesthetic '{}'", other),
                    line,
                ));
            }
        }
    }

    let x = x.ok_or_else(|| QueryError::new("charts require an 'x=' column", line))?;
    let y = y.ok_or_else(|| QueryError::new("charts require a 'y=' column", line))?;
    Ok(ChartSpec {
        kind,
        x,
        y,
        color,
        popup,
        title,
    })
}

fn parse_map_spec(tokens: &[Token], line: usize) -> Result<MapSpec, QueryError> {
    let mut lon = None;
    let mut lat = None;
    let mut popup = None;
    let mut tiles = None;
    let mut caption = None;
    for (key, value) in parse_kv_pairs(tokens, line)? {
        match key.as_str() {
            "lon" => lon = Some(value),
            "lat" => lat = Some(value),
            "popup" => popup = Some(value),
            "tiles" => tiles = Some(value),
            "caption" => caption = Some(value),
            other => {
                return Err(QueryError::new(
                    format!("unknown map option '{}'", other),
                    line,
                ));
            }
        }
    }

    let lon = lon.ok_or_else(|| QueryError::new("maps require a 'lon=' column", line))?;
    let lat = lat.ok_or_else(|| QueryError::new("maps require a 'lat=' column", line))?;
    Ok(MapSpec {
        lon,
        lat,
        popup,
        tiles,
        caption,
    })
}
