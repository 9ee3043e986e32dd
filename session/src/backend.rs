use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use lessonmd::query::{ChartKind, ChartSpec};
use thiserror::Error;

use crate::value::{ImageData, Table, fmt_number};

/// A collaborator refused to render. Surfaced to the learner as an
/// execution fault on the terminal stage.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// An opaque reference to an interactive widget owned by a collaborator.
/// The session never inspects or drives the widget's interactive behavior;
/// the only operation is `render()` into something displayable.
#[derive(Debug, Clone)]
pub struct WidgetHandle {
    id: u64,
    kind: &'static str,
    summary: String,
}

static NEXT_WIDGET_ID: AtomicU64 = AtomicU64::new(1);

impl WidgetHandle {
    pub fn new(kind: &'static str, summary: String) -> Self {
        WidgetHandle {
            id: NEXT_WIDGET_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            summary,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The single operation the session is allowed to perform.
    pub fn render(&self) -> String {
        self.summary.clone()
    }
}

impl fmt::Display for WidgetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)
    }
}

/// Charting collaborator: one declarative spec in, one opaque widget (or
/// static image) out. Column presence and numeric checks happen before the
/// call, so implementations may assume well-formed aesthetics.
pub trait ChartBackend {
    fn interactive(&self, spec: &ChartSpec, data: &Table) -> Result<WidgetHandle, BackendError>;
    fn static_image(&self, spec: &ChartSpec, data: &Table) -> Result<ImageData, BackendError>;
}

/// Mapping collaborator, consumed as a call chain: initialize with the
/// coordinate table, add a marker layer, add a basemap tile layer, and
/// optionally a positioned caption control.
pub trait MapBackend {
    fn begin(&self, data: &Table) -> Box<dyn MapCanvas>;
}

pub trait MapCanvas {
    /// Marker layer from parallel coordinate vectors, with optional popup
    /// text per marker.
    fn add_markers(&mut self, lon: Vec<f64>, lat: Vec<f64>, popup: Option<Vec<String>>);
    /// Basemap tile layer from a named provider.
    fn add_tiles(&mut self, provider: &str);
    /// Positioned text control.
    fn add_caption(&mut self, text: &str);
    fn finish(self: Box<Self>) -> Result<WidgetHandle, BackendError>;
}

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

/// Built-in chart collaborator: interactive handles summarize the chart
/// textually, static images render as a minimal SVG.
#[derive(Debug, Default)]
pub struct EmbeddedCharts;

impl ChartBackend for EmbeddedCharts {
    fn interactive(&self, spec: &ChartSpec, data: &Table) -> Result<WidgetHandle, BackendError> {
        let mut summary = format!(
            "[interactive {} chart: {} vs {}, {} points",
            spec.kind.name(),
            spec.x,
            spec.y,
            data.row_count()
        );
        if let Some(color) = &spec.color {
            summary.push_str(&format!(", colored by {}", color));
        }
        if let Some(title) = &spec.title {
            summary.push_str(&format!(", \"{}\"", title));
        }
        summary.push(']');
        Ok(WidgetHandle::new("chart", summary))
    }

    fn static_image(&self, spec: &ChartSpec, data: &Table) -> Result<ImageData, BackendError> {
        Ok(ImageData {
            format: "svg",
            data: render_svg(spec, data),
        })
    }
}

const SVG_WIDTH: f64 = 360.0;
const SVG_HEIGHT: f64 = 220.0;
const SVG_MARGIN: f64 = 30.0;

fn render_svg(spec: &ChartSpec, data: &Table) -> String {
    let ys = data.numeric_column(&spec.y).unwrap_or_default();
    // Bar charts take x positions from row order; scatter/line need numbers.
    let xs = data
        .numeric_column(&spec.x)
        .unwrap_or_else(|| (0..ys.len()).map(|i| i as f64).collect());

    let mut svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\">",
        SVG_WIDTH as u64, SVG_HEIGHT as u64
    );
    if let Some(title) = &spec.title {
        svg.push_str(&format!(
            "<text x=\"{}\" y=\"18\" text-anchor=\"middle\">{}</text>",
            (SVG_WIDTH / 2.0) as u64,
            title
        ));
    }

    let points: Vec<(f64, f64)> = scale_points(&xs, &ys);
    match spec.kind {
        ChartKind::Scatter => {
            for (px, py) in &points {
                svg.push_str(&format!(
                    "<circle cx=\"{}\" cy=\"{}\" r=\"3\"/>",
                    fmt_number(*px),
                    fmt_number(*py)
                ));
            }
        }
        ChartKind::Line => {
            let path: Vec<String> = points
                .iter()
                .map(|(px, py)| format!("{},{}", fmt_number(*px), fmt_number(*py)))
                .collect();
            svg.push_str(&format!(
                "<polyline fill=\"none\" stroke=\"black\" points=\"{}\"/>",
                path.join(" ")
            ));
        }
        ChartKind::Bar => {
            let n = points.len().max(1) as f64;
            let width = (SVG_WIDTH - 2.0 * SVG_MARGIN) / n * 0.8;
            for (px, py) in &points {
                // Keep the bar inside the canvas even when one wide bar
                // is centered near an edge.
                let left = (px - width / 2.0).max(0.0);
                let right = (px + width / 2.0).min(SVG_WIDTH);
                svg.push_str(&format!(
                    "<rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\"/>",
                    fmt_number(left),
                    fmt_number(*py),
                    fmt_number(right - left),
                    fmt_number(SVG_HEIGHT - SVG_MARGIN - py)
                ));
            }
        }
    }

    svg.push_str("</svg>");
    svg
}

/// Map data coordinates into SVG pixel space (y axis flipped).
fn scale_points(xs: &[f64], ys: &[f64]) -> Vec<(f64, f64)> {
    let (x_min, x_max) = extent(xs);
    let (y_min, y_max) = extent(ys);
    let x_span = (x_max - x_min).max(f64::EPSILON);
    let y_span = (y_max - y_min).max(f64::EPSILON);

    xs.iter()
        .zip(ys)
        .map(|(x, y)| {
            let px = SVG_MARGIN + (x - x_min) / x_span * (SVG_WIDTH - 2.0 * SVG_MARGIN);
            let py = SVG_HEIGHT - SVG_MARGIN - (y - y_min) / y_span * (SVG_HEIGHT - 2.0 * SVG_MARGIN);
            (px, py)
        })
        .collect()
}

fn extent(values: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(*v);
        max = max.max(*v);
    }
    if values.is_empty() { (0.0, 1.0) } else { (min, max) }
}

/// Built-in map collaborator producing textual widget summaries.
#[derive(Debug, Default)]
pub struct EmbeddedAtlas;

impl MapBackend for EmbeddedAtlas {
    fn begin(&self, data: &Table) -> Box<dyn MapCanvas> {
        Box::new(AtlasCanvas {
            rows: data.row_count(),
            markers: 0,
            popups: false,
            tiles: None,
            caption: None,
        })
    }
}

struct AtlasCanvas {
    rows: usize,
    markers: usize,
    popups: bool,
    tiles: Option<String>,
    caption: Option<String>,
}

impl MapCanvas for AtlasCanvas {
    fn add_markers(&mut self, lon: Vec<f64>, lat: Vec<f64>, popup: Option<Vec<String>>) {
        self.markers = lon.len().min(lat.len());
        self.popups = popup.is_some();
    }

    fn add_tiles(&mut self, provider: &str) {
        self.tiles = Some(provider.to_string());
    }

    fn add_caption(&mut self, text: &str) {
        self.caption = Some(text.to_string());
    }

    fn finish(self: Box<Self>) -> Result<WidgetHandle, BackendError> {
        if self.tiles.is_none() {
            return Err(BackendError("map has no basemap tile layer".to_string()));
        }
        let mut summary = format!(
            "[interactive map: {} of {} rows as markers",
            self.markers, self.rows
        );
        if self.popups {
            summary.push_str(" with popups");
        }
        if let Some(tiles) = &self.tiles {
            summary.push_str(&format!(", {} tiles", tiles));
        }
        if let Some(caption) = &self.caption {
            summary.push_str(&format!(", caption \"{}\"", caption));
        }
        summary.push(']');
        Ok(WidgetHandle::new("map", summary))
    }
}
