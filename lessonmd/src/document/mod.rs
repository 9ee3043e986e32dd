use std::fmt;

/// Narrative Markdown content within a section body.
/// Carries only what a lesson renderer needs; exercise blocks and dataset
/// tables are lifted out of the narrative during parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Narrative {
    pub nodes: Vec<NarrativeNode>,
}

impl Narrative {
    pub fn empty() -> Self {
        Narrative { nodes: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A single block-level node of narrative content.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrativeNode {
    Paragraph(Vec<InlineNode>),
    /// Sub-heading within a section (level 2-6; level 1 opens a new section).
    Heading {
        level: u8,
        content: Vec<InlineNode>,
    },
    /// A non-exercise code sample shown to the learner.
    CodeSample {
        language: Option<String>,
        content: String,
    },
    Blockquote(Narrative),
    /// Narrative table, cells flattened to plain text.
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    OrderedList {
        start: u64,
        items: Vec<Narrative>,
    },
    UnorderedList {
        items: Vec<Narrative>,
    },
    HorizontalRule,
}

/// Inline elements that appear within a line of text.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineNode {
    Text(String),
    Strong(Vec<InlineNode>),
    Emphasis(Vec<InlineNode>),
    CodeSpan(String),
    Link {
        dest: String,
        content: Vec<InlineNode>,
    },
    /// Static figures (e.g. a screenshot of the chart being discussed).
    Image {
        dest: String,
        alt: Vec<InlineNode>,
    },
    SoftBreak,
    HardBreak,
}

impl fmt::Display for Narrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}

impl fmt::Display for NarrativeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NarrativeNode::Paragraph(inlines) => {
                for inline in inlines {
                    write!(f, "{}", inline)?;
                }
                writeln!(f)
            }
            NarrativeNode::Heading { level, content } => {
                for _ in 0..*level {
                    write!(f, "#")?;
                }
                write!(f, " ")?;
                for inline in content {
                    write!(f, "{}", inline)?;
                }
                writeln!(f)
            }
            NarrativeNode::CodeSample { language, content } => {
                write!(f, "```")?;
                if let Some(lang) = language {
                    write!(f, "{}", lang)?;
                }
                writeln!(f)?;
                write!(f, "{}", content)?;
                writeln!(f, "```")
            }
            NarrativeNode::Blockquote(inner) => {
                let text = format!("{}", inner);
                for line in text.lines() {
                    writeln!(f, "> {}", line)?;
                }
                Ok(())
            }
            NarrativeNode::Table { headers, rows } => {
                write!(f, "|")?;
                for header in headers {
                    write!(f, " {} |", header)?;
                }
                writeln!(f)?;
                write!(f, "|")?;
                for _ in headers {
                    write!(f, "---|")?;
                }
                writeln!(f)?;
                for row in rows {
                    write!(f, "|")?;
                    for cell in row {
                        write!(f, " {} |", cell)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            NarrativeNode::OrderedList { start, items } => {
                for (i, item) in items.iter().enumerate() {
                    write!(f, "{}. {}", *start as usize + i, item)?;
                }
                Ok(())
            }
            NarrativeNode::UnorderedList { items } => {
                for item in items {
                    write!(f, "- {}", item)?;
                }
                Ok(())
            }
            NarrativeNode::HorizontalRule => writeln!(f, "---"),
        }
    }
}

impl fmt::Display for InlineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineNode::Text(s) => write!(f, "{}", s),
            InlineNode::Strong(children) => {
                write!(f, "**")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, "**")
            }
            InlineNode::Emphasis(children) => {
                write!(f, "*")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, "*")
            }
            InlineNode::CodeSpan(code) => write!(f, "`{}`", code),
            InlineNode::Link { dest, content } => {
                write!(f, "[")?;
                for child in content {
                    write!(f, "{}", child)?;
                }
                write!(f, "]({})", dest)
            }
            InlineNode::Image { dest, alt } => {
                write!(f, "![")?;
                for child in alt {
                    write!(f, "{}", child)?;
                }
                write!(f, "]({})", dest)
            }
            InlineNode::SoftBreak => writeln!(f),
            InlineNode::HardBreak => writeln!(f),
        }
    }
}
