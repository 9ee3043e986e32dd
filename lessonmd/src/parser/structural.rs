use std::collections::HashSet;
use std::ops::Range;

use pulldown_cmark::{Event, HeadingLevel, Options, Parser as CmarkParser, Tag, TagEnd};

use crate::Lesson;
use crate::document::{InlineNode, Narrative, NarrativeNode};
use crate::parser::error::ParseError;
use crate::query;
use crate::section::{DatasetDecl, ExerciseDecl, Section, SectionNode};

/// Heading prefix that turns a level-1 section into a dataset declaration.
const DATASET_PREFIX: &str = "Dataset:";

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse Markdown source text into a validated Lesson.
pub fn parse_lesson(source: &str, file_id: usize) -> Result<Lesson, Vec<ParseError>> {
    let options = Options::ENABLE_TABLES;
    let parser = CmarkParser::new_ext(source, options);
    let events: Vec<(Event<'_>, Range<usize>)> = parser.into_offset_iter().collect();

    let mut state = ParseState::new(source, file_id);
    state.process_events(&events);
    state.finalize()
}

// ---------------------------------------------------------------------------
// Parse state
// ---------------------------------------------------------------------------

struct ParseState<'a> {
    source: &'a str,
    file_id: usize,
    sections: Vec<Section>,
    datasets: Vec<DatasetDecl>,
    current: Option<SectionBuilder>,
    errors: Vec<ParseError>,
}

struct SectionBuilder {
    title: String,
    /// Set when the heading carried the `Dataset:` prefix; holds the name.
    dataset_name: Option<String>,
    /// 1-based ordinal among teaching sections, used for default exercise ids.
    ordinal: usize,
    nodes: Vec<SectionNode>,
    /// Tables seen in a dataset section: (columns, rows, span).
    tables: Vec<(Vec<String>, Vec<Vec<String>>, Range<usize>)>,
    exercise_count: usize,
    span_start: usize,
}

impl<'a> ParseState<'a> {
    fn new(source: &'a str, file_id: usize) -> Self {
        ParseState {
            source,
            file_id,
            sections: Vec::new(),
            datasets: Vec::new(),
            current: None,
            errors: Vec::new(),
        }
    }

    fn process_events(&mut self, events: &[(Event<'_>, Range<usize>)]) {
        let mut i = 0;

        while i < events.len() {
            let (ref ev, ref range) = events[i];

            match ev {
                Event::Start(Tag::Heading { level, .. }) if *level == HeadingLevel::H1 => {
                    i += 1;
                    let title = collect_heading_text(events, &mut i);
                    let title = normalize_title(&title);
                    self.close_section(range.start);
                    self.open_section(title, range.start);
                }

                Event::Start(Tag::Heading { level, .. }) => {
                    let heading_level = heading_level_to_u8(level);
                    i += 1;
                    let content =
                        self.collect_inlines(events, &mut i, &|e| matches!(e, TagEnd::Heading(_)));
                    self.push_narrative(NarrativeNode::Heading {
                        level: heading_level,
                        content,
                    });
                }

                Event::Start(Tag::Paragraph) => {
                    i += 1;
                    let inlines =
                        self.collect_inlines(events, &mut i, &|e| matches!(e, TagEnd::Paragraph));
                    self.push_narrative(NarrativeNode::Paragraph(inlines));
                }

                Event::Start(Tag::CodeBlock(kind)) => {
                    let info = match kind {
                        pulldown_cmark::CodeBlockKind::Fenced(info) => info.to_string(),
                        pulldown_cmark::CodeBlockKind::Indented => String::new(),
                    };
                    let span = range.clone();
                    i += 1;
                    let content =
                        collect_text_until(events, &mut i, |e| matches!(e, TagEnd::CodeBlock));
                    self.handle_code_block(info, content, span);
                }

                Event::Start(Tag::Table(_)) => {
                    let span = range.clone();
                    i += 1;
                    let (headers, rows) = self.collect_table(events, &mut i);
                    self.handle_table(headers, rows, span);
                }

                Event::Start(Tag::BlockQuote(_)) => {
                    i += 1;
                    let inner = self.collect_blockquote(events, &mut i);
                    self.push_narrative(NarrativeNode::Blockquote(inner));
                }

                Event::Start(Tag::List(start)) => {
                    let start = *start;
                    i += 1;
                    let items = self.collect_list_items(events, &mut i, start.is_some());
                    let node = match start {
                        Some(n) => NarrativeNode::OrderedList { start: n, items },
                        None => NarrativeNode::UnorderedList { items },
                    };
                    self.push_narrative(node);
                }

                Event::Rule => {
                    self.push_narrative(NarrativeNode::HorizontalRule);
                    i += 1;
                }

                _ => {
                    i += 1;
                }
            }
        }
    }

    fn open_section(&mut self, title: String, span_start: usize) {
        let dataset_name = title
            .strip_prefix(DATASET_PREFIX)
            .map(|rest| rest.trim().to_string());

        if let Some(name) = &dataset_name {
            if name.is_empty() {
                self.errors.push(ParseError::error(
                    "dataset declaration is missing a name",
                    span_start..span_start + DATASET_PREFIX.len(),
                    self.file_id,
                ));
            }
        }

        let ordinal = if dataset_name.is_some() {
            0
        } else {
            self.sections.len() + 1
        };

        self.current = Some(SectionBuilder {
            title,
            dataset_name,
            ordinal,
            nodes: Vec::new(),
            tables: Vec::new(),
            exercise_count: 0,
            span_start,
        });
    }

    fn close_section(&mut self, span_end: usize) {
        let Some(builder) = self.current.take() else {
            return;
        };
        let span = builder.span_start..span_end;

        match builder.dataset_name {
            Some(name) => {
                if builder.tables.len() != 1 {
                    self.errors.push(
                        ParseError::error(
                            format!(
                                "dataset '{}' must contain exactly one table, found {}",
                                name,
                                builder.tables.len()
                            ),
                            span,
                            self.file_id,
                        )
                        .with_note("declare the dataset body as a single Markdown table"),
                    );
                    return;
                }
                let Some((columns, rows, table_span)) = builder.tables.into_iter().next() else {
                    return;
                };
                if columns.is_empty() {
                    self.errors.push(ParseError::error(
                        format!("dataset '{}' has no columns", name),
                        table_span,
                        self.file_id,
                    ));
                    return;
                }
                for (row_idx, row) in rows.iter().enumerate() {
                    if row.len() != columns.len() {
                        self.errors.push(ParseError::error(
                            format!(
                                "dataset '{}': row {} has {} cells, expected {}",
                                name,
                                row_idx + 1,
                                row.len(),
                                columns.len()
                            ),
                            table_span.clone(),
                            self.file_id,
                        ));
                        return;
                    }
                }
                self.datasets.push(DatasetDecl {
                    name,
                    columns,
                    rows,
                    span,
                });
            }
            None => {
                self.sections.push(Section {
                    title: builder.title,
                    nodes: builder.nodes,
                    span,
                });
            }
        }
    }

    fn handle_code_block(&mut self, info: String, content: String, span: Range<usize>) {
        let mut parts = info.split_whitespace();
        if parts.next() != Some("exercise") {
            let language = if info.is_empty() {
                None
            } else {
                Some(info)
            };
            self.push_narrative(NarrativeNode::CodeSample { language, content });
            return;
        }

        let mut explicit_id = None;
        let mut source = None;
        for part in parts {
            match part.split_once('=') {
                Some(("id", value)) if !value.is_empty() => explicit_id = Some(value.to_string()),
                Some(("data", value)) if !value.is_empty() => source = Some(value.to_string()),
                _ => {
                    self.errors.push(ParseError::error(
                        format!("malformed exercise attribute '{}'", part),
                        span.clone(),
                        self.file_id,
                    ));
                    return;
                }
            }
        }

        let Some(builder) = self.current.as_mut() else {
            self.errors.push(ParseError::error(
                "exercise block outside of any section",
                span,
                self.file_id,
            ));
            return;
        };
        if builder.dataset_name.is_some() {
            self.errors.push(ParseError::error(
                "exercise blocks are not allowed inside dataset declarations",
                span,
                self.file_id,
            ));
            return;
        }

        builder.exercise_count += 1;
        let id = explicit_id
            .unwrap_or_else(|| format!("{}.{}", builder.ordinal, builder.exercise_count));
        builder.nodes.push(SectionNode::Exercise(ExerciseDecl {
            id,
            source,
            code: content,
            span,
        }));
    }

    fn handle_table(
        &mut self,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        span: Range<usize>,
    ) {
        let Some(builder) = self.current.as_mut() else {
            return;
        };
        if builder.dataset_name.is_some() {
            builder.tables.push((headers, rows, span));
        } else {
            builder
                .nodes
                .push(SectionNode::Narrative(NarrativeNode::Table {
                    headers,
                    rows,
                }));
        }
    }

    fn push_narrative(&mut self, node: NarrativeNode) {
        if let Some(builder) = self.current.as_mut() {
            builder.nodes.push(SectionNode::Narrative(node));
        }
        // Content before the first heading has no section to live in; skip it.
    }

    /// Collect inline nodes until a matching End tag.
    fn collect_inlines(
        &self,
        events: &[(Event<'_>, Range<usize>)],
        i: &mut usize,
        is_end: &dyn Fn(&TagEnd) -> bool,
    ) -> Vec<InlineNode> {
        let mut inlines = Vec::new();

        while *i < events.len() {
            let (ref ev, _) = events[*i];
            match ev {
                Event::End(tag_end) if is_end(tag_end) => {
                    *i += 1;
                    break;
                }
                Event::Text(s) => {
                    inlines.push(InlineNode::Text(s.to_string()));
                    *i += 1;
                }
                Event::Code(s) => {
                    inlines.push(InlineNode::CodeSpan(s.to_string()));
                    *i += 1;
                }
                Event::SoftBreak => {
                    inlines.push(InlineNode::SoftBreak);
                    *i += 1;
                }
                Event::HardBreak => {
                    inlines.push(InlineNode::HardBreak);
                    *i += 1;
                }
                Event::Start(Tag::Strong) => {
                    *i += 1;
                    let children =
                        self.collect_inlines(events, i, &|e| matches!(e, TagEnd::Strong));
                    inlines.push(InlineNode::Strong(children));
                }
                Event::Start(Tag::Emphasis) => {
                    *i += 1;
                    let children =
                        self.collect_inlines(events, i, &|e| matches!(e, TagEnd::Emphasis));
                    inlines.push(InlineNode::Emphasis(children));
                }
                Event::Start(Tag::Link { dest_url, .. }) => {
                    let dest = dest_url.to_string();
                    *i += 1;
                    let content =
                        self.collect_inlines(events, i, &|e| matches!(e, TagEnd::Link));
                    inlines.push(InlineNode::Link { dest, content });
                }
                Event::Start(Tag::Image { dest_url, .. }) => {
                    let dest = dest_url.to_string();
                    *i += 1;
                    let alt = self.collect_inlines(events, i, &|e| matches!(e, TagEnd::Image));
                    inlines.push(InlineNode::Image { dest, alt });
                }
                _ => {
                    *i += 1;
                }
            }
        }

        inlines
    }

    /// Collect table headers and rows, flattening cell content to text.
    fn collect_table(
        &self,
        events: &[(Event<'_>, Range<usize>)],
        i: &mut usize,
    ) -> (Vec<String>, Vec<Vec<String>>) {
        let mut headers: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut in_head = false;
        let mut current_row: Vec<String> = Vec::new();

        while *i < events.len() {
            let (ref ev, _) = events[*i];
            match ev {
                Event::End(TagEnd::Table) => {
                    *i += 1;
                    break;
                }
                Event::Start(Tag::TableHead) => {
                    in_head = true;
                    *i += 1;
                }
                Event::End(TagEnd::TableHead) => {
                    in_head = false;
                    headers = std::mem::take(&mut current_row);
                    *i += 1;
                }
                Event::Start(Tag::TableRow) => {
                    current_row = Vec::new();
                    *i += 1;
                }
                Event::End(TagEnd::TableRow) => {
                    if !in_head {
                        rows.push(std::mem::take(&mut current_row));
                    }
                    *i += 1;
                }
                Event::Start(Tag::TableCell) => {
                    *i += 1;
                    let cell =
                        self.collect_inlines(events, i, &|e| matches!(e, TagEnd::TableCell));
                    current_row.push(flatten_inlines(&cell));
                }
                _ => {
                    *i += 1;
                }
            }
        }

        (headers, rows)
    }

    /// Collect a blockquote's content as a Narrative.
    fn collect_blockquote(
        &self,
        events: &[(Event<'_>, Range<usize>)],
        i: &mut usize,
    ) -> Narrative {
        let mut nodes = Vec::new();

        while *i < events.len() {
            let (ref ev, _) = events[*i];
            match ev {
                Event::End(TagEnd::BlockQuote(_)) => {
                    *i += 1;
                    break;
                }
                Event::Start(Tag::Paragraph) => {
                    *i += 1;
                    let inlines =
                        self.collect_inlines(events, i, &|e| matches!(e, TagEnd::Paragraph));
                    nodes.push(NarrativeNode::Paragraph(inlines));
                }
                _ => {
                    *i += 1;
                }
            }
        }

        Narrative { nodes }
    }

    /// Collect list items as Narratives (narrative content only).
    fn collect_list_items(
        &self,
        events: &[(Event<'_>, Range<usize>)],
        i: &mut usize,
        ordered: bool,
    ) -> Vec<Narrative> {
        let mut items = Vec::new();

        while *i < events.len() {
            let (ref ev, _) = events[*i];
            match ev {
                Event::End(TagEnd::List(was_ordered)) if *was_ordered == ordered => {
                    *i += 1;
                    break;
                }
                Event::Start(Tag::Item) => {
                    *i += 1;
                    let mut item_nodes = Vec::new();
                    while *i < events.len() {
                        let (ref ev2, _) = events[*i];
                        match ev2 {
                            Event::End(TagEnd::Item) => {
                                *i += 1;
                                break;
                            }
                            Event::Start(Tag::Paragraph) => {
                                *i += 1;
                                let inlines = self.collect_inlines(events, i, &|e| {
                                    matches!(e, TagEnd::Paragraph)
                                });
                                item_nodes.push(NarrativeNode::Paragraph(inlines));
                            }
                            Event::Text(s) => {
                                item_nodes.push(NarrativeNode::Paragraph(vec![
                                    InlineNode::Text(s.to_string()),
                                ]));
                                *i += 1;
                            }
                            _ => {
                                *i += 1;
                            }
                        }
                    }
                    items.push(Narrative { nodes: item_nodes });
                }
                _ => {
                    *i += 1;
                }
            }
        }

        items
    }

    fn finalize(mut self) -> Result<Lesson, Vec<ParseError>> {
        self.close_section(self.source.len());
        self.validate();

        if self.errors.is_empty() {
            Ok(Lesson {
                sections: self.sections,
                datasets: self.datasets,
                source_id: self.file_id,
            })
        } else {
            Err(self.errors)
        }
    }

    /// Cross-document validation: duplicate identifiers and dataset
    /// references in default exercise code. Errors accumulate in a local
    /// sink while the section and dataset lists are borrowed.
    fn validate(&mut self) {
        let mut errors = Vec::new();

        let mut seen_sections = HashSet::new();
        for section in &self.sections {
            if !seen_sections.insert(section.title.as_str()) {
                errors.push(ParseError::error(
                    format!("duplicate section '{}'", section.title),
                    section.span.clone(),
                    self.file_id,
                ));
            }
        }

        let mut dataset_names = HashSet::new();
        for dataset in &self.datasets {
            if !dataset_names.insert(dataset.name.as_str()) {
                errors.push(ParseError::error(
                    format!("duplicate dataset '{}'", dataset.name),
                    dataset.span.clone(),
                    self.file_id,
                ));
            }
        }

        let mut exercise_ids = HashSet::new();
        for section in &self.sections {
            for exercise in section.exercises() {
                if !exercise_ids.insert(exercise.id.clone()) {
                    errors.push(ParseError::error(
                        format!("duplicate exercise id '{}'", exercise.id),
                        exercise.span.clone(),
                        self.file_id,
                    ));
                }

                if let Some(source) = &exercise.source {
                    if !dataset_names.contains(source.as_str()) {
                        errors.push(ParseError::error(
                            format!(
                                "exercise '{}' is bound to unknown dataset '{}'",
                                exercise.id, source
                            ),
                            exercise.span.clone(),
                            self.file_id,
                        ));
                    }
                }

                self.validate_default_code(exercise, &dataset_names, &mut errors);
            }
        }

        self.errors.append(&mut errors);
    }

    /// Default code must parse and may only read declared datasets or
    /// bindings created earlier in the same fragment.
    fn validate_default_code(
        &self,
        exercise: &ExerciseDecl,
        datasets: &HashSet<&str>,
        errors: &mut Vec<ParseError>,
    ) {
        let program = match query::parse_program(&exercise.code) {
            Ok(p) => p,
            Err(err) => {
                errors.push(
                    ParseError::error(
                        format!(
                            "exercise '{}': default code does not parse: {}",
                            exercise.id, err.message
                        ),
                        exercise.span.clone(),
                        self.file_id,
                    )
                    .with_note(format!("at line {} of the code fragment", err.line)),
                );
                return;
            }
        };

        let mut bindings: HashSet<&str> = HashSet::new();
        for statement in &program.statements {
            if let Some(source) = statement.pipeline.source.as_deref() {
                if !datasets.contains(source) && !bindings.contains(source) {
                    errors.push(ParseError::error(
                        format!(
                            "exercise '{}': default code reads undeclared dataset '{}'",
                            exercise.id, source
                        ),
                        exercise.span.clone(),
                        self.file_id,
                    ));
                }
            }
            if let Some(binding) = statement.binding.as_deref() {
                bindings.insert(binding);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn heading_level_to_u8(level: &HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Collect heading text (all Text events until End(Heading)).
fn collect_heading_text(events: &[(Event<'_>, Range<usize>)], i: &mut usize) -> String {
    let mut title = String::new();
    while *i < events.len() {
        let (ref ev, _) = events[*i];
        match ev {
            Event::End(TagEnd::Heading(_)) => {
                *i += 1;
                break;
            }
            Event::Text(s) => {
                title.push_str(s);
                *i += 1;
            }
            Event::Code(s) => {
                title.push_str(s);
                *i += 1;
            }
            _ => {
                *i += 1;
            }
        }
    }
    title
}

/// Normalize a section title: strip leading/trailing whitespace, collapse
/// interior whitespace.
fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect all text content until a matching End tag.
fn collect_text_until(
    events: &[(Event<'_>, Range<usize>)],
    i: &mut usize,
    is_end: impl Fn(&TagEnd) -> bool,
) -> String {
    let mut text = String::new();
    while *i < events.len() {
        let (ref ev, _) = events[*i];
        match ev {
            Event::End(tag_end) if is_end(tag_end) => {
                *i += 1;
                break;
            }
            Event::Text(s) => {
                text.push_str(s);
                *i += 1;
            }
            _ => {
                *i += 1;
            }
        }
    }
    text
}

/// Render inline nodes as plain text for table cells.
fn flatten_inlines(inlines: &[InlineNode]) -> String {
    inlines
        .iter()
        .map(|n| format!("{}", n))
        .collect::<Vec<_>>()
        .join("")
}
