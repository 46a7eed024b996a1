//! Chart construction from analysis results
//!
//! A [`Visualizer`] turns columns of a result table into a [`Figure`]: the
//! chart kind, its options and the exact values to plot. Drawing the figure
//! with Plotters lives in [`crate::render`].

use std::path::Path;

use plotters::style::{RGBColor, BLACK, BLUE, CYAN, GREEN, MAGENTA, RED, WHITE, YELLOW};
use polars::prelude::*;
use tracing::{info, Span};

use crate::analysis::{histogram_bins, numeric_values};
use crate::data::require_column;
use crate::error::Error;

/// Named colours accepted by [`parse_color`].
const NAMED_COLORS: [(&str, RGBColor); 12] = [
    ("blue", BLUE),
    ("red", RED),
    ("green", GREEN),
    ("yellow", YELLOW),
    ("magenta", MAGENTA),
    ("cyan", CYAN),
    ("black", BLACK),
    ("white", WHITE),
    ("orange", RGBColor(255, 165, 0)),
    ("purple", RGBColor(128, 0, 128)),
    ("gray", RGBColor(128, 128, 128)),
    ("grey", RGBColor(128, 128, 128)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Heatmap,
    Histogram,
}

impl ChartKind {
    pub fn name(self) -> &'static str {
        match self {
            ChartKind::Bar => "Bar",
            ChartKind::Line => "Line",
            ChartKind::Pie => "Pie",
            ChartKind::Heatmap => "Heatmap",
            ChartKind::Histogram => "Histogram",
        }
    }

    /// Canvas size in pixels.
    pub fn canvas_size(self) -> (u32, u32) {
        match self {
            ChartKind::Pie => (800, 800),
            ChartKind::Heatmap => (1000, 800),
            ChartKind::Bar | ChartKind::Line | ChartKind::Histogram => (1000, 600),
        }
    }
}

/// Title, axis labels and series colour of a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartOptions {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub color: RGBColor,
}

impl ChartOptions {
    /// Defaults for `kind`: "<Kind> Chart" as title, no axis labels, blue.
    pub fn for_kind(kind: ChartKind) -> Self {
        let title = match kind {
            ChartKind::Heatmap => "Heatmap".to_string(),
            ChartKind::Histogram => "Spending Distribution".to_string(),
            other => format!("{} Chart", other.name()),
        };
        Self {
            title,
            x_label: String::new(),
            y_label: String::new(),
            color: BLUE,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn labels(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = x_label.into();
        self.y_label = y_label.into();
        self
    }

    pub fn color(mut self, color: &str) -> crate::Result<Self> {
        self.color = parse_color(color)?;
        Ok(self)
    }
}

/// Parse a named colour or a `#rrggbb` hex string.
pub fn parse_color(value: &str) -> crate::Result<RGBColor> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|c| u8::from_str_radix(c, 16).ok())
        };
        if hex.len() == 6 {
            if let (Some(r), Some(g), Some(b)) = (channel(0), channel(2), channel(4)) {
                return Ok(RGBColor(r, g, b));
            }
        }
    }
    NAMED_COLORS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, color)| *color)
        .ok_or_else(|| Error::InvalidChartData(format!("unknown colour '{value}'")))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PieSlice {
    pub label: String,
    pub value: f64,
    /// Share of the total, in `[0, 1]`.
    pub fraction: f64,
}

/// The values a figure plots.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartData {
    Bars {
        labels: Vec<String>,
        values: Vec<f64>,
    },
    /// Points sorted by x. With `time_axis`, x is milliseconds since the epoch.
    Line {
        points: Vec<(f64, f64)>,
        time_axis: bool,
    },
    Pie {
        slices: Vec<PieSlice>,
    },
    /// Symmetric correlation matrix, rows and columns in `columns` order.
    Heatmap {
        columns: Vec<String>,
        matrix: Vec<Vec<f64>>,
    },
}

/// An in-memory chart; draw it with [`Figure::to_svg`] or [`Figure::save`].
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub(crate) kind: ChartKind,
    pub(crate) options: ChartOptions,
    pub(crate) data: ChartData,
}

impl Figure {
    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn options(&self) -> &ChartOptions {
        &self.options
    }

    pub fn data(&self) -> &ChartData {
        &self.data
    }

    pub fn pie_slices(&self) -> Option<&[PieSlice]> {
        match &self.data {
            ChartData::Pie { slices } => Some(slices),
            _ => None,
        }
    }
}

/// Builds figures from one result table without modifying it.
#[derive(Debug, Clone)]
pub struct Visualizer {
    data: DataFrame,
    span: Span,
}

impl Visualizer {
    pub fn new(data: DataFrame, span: Span) -> Self {
        info!(parent: &span, rows = data.height(), columns = data.width(), "visualizer initialised");
        Self { data, span }
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    /// One bar per distinct `x`, in first-appearance order.
    ///
    /// When `x` repeats, the bar shows the mean of its `y` values.
    pub fn bar_chart(
        &self,
        x: &str,
        y: &str,
        options: &ChartOptions,
        save_path: Option<&Path>,
    ) -> crate::Result<Figure> {
        require_column(&self.data, x)?;
        require_numeric(&self.data, y)?;
        info!(parent: &self.span, x, y, "generating bar chart");

        let bars = self
            .data
            .clone()
            .lazy()
            .select([
                col(x).cast(DataType::String),
                col(y).cast(DataType::Float64),
            ])
            .group_by_stable([col(x)])
            .agg([col(y).mean()])
            .collect()?;

        let labels = bars
            .column(x)?
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or("null").to_string())
            .collect();
        let values = bars
            .column(y)?
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(0.0))
            .collect();

        self.finish(
            Figure {
                kind: ChartKind::Bar,
                options: options.clone(),
                data: ChartData::Bars { labels, values },
            },
            save_path,
        )
    }

    /// Plot `y` against an orderable `x` (date, datetime or number).
    pub fn line_chart(
        &self,
        x: &str,
        y: &str,
        options: &ChartOptions,
        save_path: Option<&Path>,
    ) -> crate::Result<Figure> {
        require_column(&self.data, x)?;
        require_numeric(&self.data, y)?;
        info!(parent: &self.span, x, y, "generating line chart");

        let x_series = self.data.column(x)?;
        let (xs, time_axis) = match x_series.dtype() {
            DataType::Date | DataType::Datetime(_, _) => {
                let millis = x_series
                    .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
                    .cast(&DataType::Int64)?
                    .cast(&DataType::Float64)?;
                (millis, true)
            }
            dtype if dtype.is_numeric() => (x_series.cast(&DataType::Float64)?, false),
            _ => {
                return Err(Error::Compatibility {
                    plot: ChartKind::Line.name().to_string(),
                    required: vec![format!("date or numeric {x}")],
                })
            }
        };
        let ys = self.data.column(y)?.cast(&DataType::Float64)?;

        let mut points: Vec<(f64, f64)> = xs
            .f64()?
            .into_iter()
            .zip(ys.f64()?.into_iter())
            .filter_map(|(x, y)| Some((x?, y?)))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        self.finish(
            Figure {
                kind: ChartKind::Line,
                options: options.clone(),
                data: ChartData::Line { points, time_axis },
            },
            save_path,
        )
    }

    /// One slice per value, sized by its share of the total.
    ///
    /// Negative or non-finite values and an all-zero total are rejected.
    pub fn pie_chart<S: AsRef<str>>(
        &self,
        values: &[f64],
        labels: &[S],
        options: &ChartOptions,
        save_path: Option<&Path>,
    ) -> crate::Result<Figure> {
        info!(parent: &self.span, slices = values.len(), "generating pie chart");
        let slices = pie_slices(values, labels)?;

        self.finish(
            Figure {
                kind: ChartKind::Pie,
                options: options.clone(),
                data: ChartData::Pie { slices },
            },
            save_path,
        )
    }

    /// Correlation grid over the numeric columns of `table`.
    pub fn heatmap(
        &self,
        table: &DataFrame,
        options: &ChartOptions,
        save_path: Option<&Path>,
    ) -> crate::Result<Figure> {
        let (columns, matrix) = correlation_matrix(table)?;
        if columns.is_empty() {
            return Err(Error::Compatibility {
                plot: ChartKind::Heatmap.name().to_string(),
                required: vec!["numeric".to_string()],
            });
        }
        info!(parent: &self.span, columns = columns.len(), "generating heatmap");

        self.finish(
            Figure {
                kind: ChartKind::Heatmap,
                options: options.clone(),
                data: ChartData::Heatmap { columns, matrix },
            },
            save_path,
        )
    }

    /// Equal-width histogram of a numeric column.
    pub fn histogram(
        &self,
        column: &str,
        bins: usize,
        options: &ChartOptions,
        save_path: Option<&Path>,
    ) -> crate::Result<Figure> {
        let values = numeric_values(&self.data, column)?;
        info!(parent: &self.span, column, bins, "generating histogram");

        let bins = histogram_bins(&values, bins)?;
        let labels = bins
            .iter()
            .map(|b| format!("{:.1}-{:.1}", b.start, b.end))
            .collect();
        let values = bins.iter().map(|b| f64::from(b.count)).collect();

        self.finish(
            Figure {
                kind: ChartKind::Histogram,
                options: options.clone(),
                data: ChartData::Bars { labels, values },
            },
            save_path,
        )
    }

    fn finish(&self, figure: Figure, save_path: Option<&Path>) -> crate::Result<Figure> {
        if let Some(path) = save_path {
            figure.save(path)?;
            info!(parent: &self.span, path = %path.display(), "{} chart saved", figure.kind.name());
        }
        Ok(figure)
    }
}

fn require_numeric(df: &DataFrame, column: &str) -> crate::Result<()> {
    require_column(df, column)?;
    let dtype = df.column(column)?.dtype();
    if dtype.is_numeric() {
        Ok(())
    } else {
        Err(Error::Parse {
            column: column.to_string(),
            value: dtype.to_string(),
            reason: "expected a numeric column".to_string(),
        })
    }
}

fn pie_slices<S: AsRef<str>>(values: &[f64], labels: &[S]) -> crate::Result<Vec<PieSlice>> {
    if values.len() != labels.len() {
        return Err(Error::InvalidChartData(format!(
            "{} values but {} labels",
            values.len(),
            labels.len()
        )));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(Error::InvalidChartData(format!(
            "pie values must be finite and non-negative, got {bad}"
        )));
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return Err(Error::InvalidChartData("pie values sum to zero".to_string()));
    }

    Ok(values
        .iter()
        .zip(labels)
        .map(|(&value, label)| PieSlice {
            label: label.as_ref().to_string(),
            value,
            fraction: value / total,
        })
        .collect())
}

/// Pairwise Pearson correlation of every numeric column in `df`.
///
/// Each pair uses the rows where both values are present. A pair with fewer
/// than two such rows, or with a constant side, is NaN.
pub fn correlation_matrix(df: &DataFrame) -> crate::Result<(Vec<String>, Vec<Vec<f64>>)> {
    let mut names = Vec::new();
    let mut columns = Vec::new();
    for series in df.get_columns().iter().filter(|s| s.dtype().is_numeric()) {
        let values: Vec<Option<f64>> = series.cast(&DataType::Float64)?.f64()?.into_iter().collect();
        names.push(series.name().to_string());
        columns.push(values);
    }

    let matrix = columns
        .iter()
        .map(|a| columns.iter().map(|b| pearson(a, b)).collect())
        .collect();
    Ok((names, matrix))
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return f64::NAN;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}
