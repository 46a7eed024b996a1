//! Drawing figures with Plotters

use std::fmt::Display;
use std::path::Path;

use chrono::DateTime;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::error::Error;
use crate::viz::{ChartData, ChartOptions, Figure, PieSlice};

const NAN_COLOR: RGBColor = RGBColor(200, 200, 200);

impl Figure {
    /// Write the figure to `path`; the extension picks the image format.
    pub fn save(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let size = self.kind.canvas_size();

        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "bmp" => {
                self.draw(&BitMapBackend::new(path, size).into_drawing_area())
            }
            "svg" => self.draw(&SVGBackend::new(path, size).into_drawing_area()),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }

    /// Render the figure as an SVG document in memory.
    pub fn to_svg(&self) -> crate::Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, self.kind.canvas_size()).into_drawing_area();
            self.draw(&root)?;
        }
        Ok(svg)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> crate::Result<()> {
        root.fill(&WHITE).map_err(draw_err)?;
        match &self.data {
            ChartData::Bars { labels, values } => draw_bars(root, &self.options, labels, values)?,
            ChartData::Line { points, time_axis } => {
                draw_line(root, &self.options, points, *time_axis)?
            }
            ChartData::Pie { slices } => draw_pie(root, &self.options, slices)?,
            ChartData::Heatmap { columns, matrix } => {
                draw_heatmap(root, &self.options, columns, matrix)?
            }
        }
        root.present().map_err(draw_err)
    }
}

fn draw_err<E: Display>(e: E) -> Error {
    Error::Render(e.to_string())
}

fn draw_bars<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    options: &ChartOptions,
    labels: &[String],
    values: &[f64],
) -> crate::Result<()> {
    let n = labels.len().max(1);
    let (y_min, y_max) = padded_range(values.iter().copied().chain([0.0]));

    let mut chart = ChartBuilder::on(root)
        .caption(options.title.as_str(), ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), y_min..y_max)
        .map_err(draw_err)?;

    let x_label = |x: &f64| label_at(labels, *x);
    let y_label = |y: &f64| format_currency(*y);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .x_desc(options.x_label.as_str())
        .y_desc(options.y_label.as_str())
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(draw_err)?;

    chart
        .draw_series(values.iter().enumerate().map(|(i, &v)| {
            let x = i as f64;
            Rectangle::new([(x - 0.4, 0.0), (x + 0.4, v)], options.color.filled())
        }))
        .map_err(draw_err)?;

    Ok(())
}

fn draw_line<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    options: &ChartOptions,
    points: &[(f64, f64)],
    time_axis: bool,
) -> crate::Result<()> {
    let (x_min, x_max) = padded_range(points.iter().map(|p| p.0));
    let (y_min, y_max) = padded_range(points.iter().map(|p| p.1));

    let mut chart = ChartBuilder::on(root)
        .caption(options.title.as_str(), ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(80)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(draw_err)?;

    let x_label = |x: &f64| {
        if time_axis {
            DateTime::from_timestamp_millis(*x as i64)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        } else {
            format!("{x}")
        }
    };
    let y_label = |y: &f64| format_currency(*y);
    chart
        .configure_mesh()
        .x_labels(8)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .x_desc(options.x_label.as_str())
        .y_desc(options.y_label.as_str())
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(draw_err)?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), options.color.stroke_width(2)))
        .map_err(draw_err)?;
    chart
        .draw_series(points.iter().map(|&p| Circle::new(p, 3, options.color.filled())))
        .map_err(draw_err)?;

    Ok(())
}

fn draw_pie<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    options: &ChartOptions,
    slices: &[PieSlice],
) -> crate::Result<()> {
    let area = root
        .titled(options.title.as_str(), ("sans-serif", 30))
        .map_err(draw_err)?;

    let (width, height) = area.dim_in_pixel();
    let center = (width as i32 / 2, height as i32 / 2);
    let radius = f64::from(width.min(height)) * 0.35;

    let sizes: Vec<f64> = slices.iter().map(|s| s.value).collect();
    let labels: Vec<String> = slices.iter().map(|s| s.label.clone()).collect();
    let colors: Vec<RGBColor> = (0..slices.len()).map(palette_color).collect();

    let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
    pie.start_angle(140.0);
    pie.label_style(("sans-serif", 18).into_font().color(&BLACK));
    pie.percentages(("sans-serif", radius * 0.08).into_font().color(&BLACK));
    area.draw(&pie).map_err(draw_err)?;

    Ok(())
}

fn draw_heatmap<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    options: &ChartOptions,
    columns: &[String],
    matrix: &[Vec<f64>],
) -> crate::Result<()> {
    let n = columns.len().max(1);
    let upper = n as f64 - 0.5;

    let mut chart = ChartBuilder::on(root)
        .caption(options.title.as_str(), ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size(120)
        .build_cartesian_2d(-0.5f64..upper, -0.5f64..upper)
        .map_err(draw_err)?;

    // row 0 is drawn at the top
    let row_y = |i: usize| (n - 1 - i) as f64;
    let x_label = |x: &f64| label_at(columns, *x);
    let y_label = |y: &f64| {
        let flipped = (n - 1) as f64 - *y;
        label_at(columns, flipped)
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n)
        .y_labels(n)
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .draw()
        .map_err(draw_err)?;

    let cells = matrix.iter().enumerate().flat_map(|(i, row)| {
        row.iter()
            .enumerate()
            .map(move |(j, &v)| (j as f64, row_y(i), v))
    });

    chart
        .draw_series(cells.clone().map(|(x, y, v)| {
            Rectangle::new([(x - 0.5, y - 0.5), (x + 0.5, y + 0.5)], coolwarm(v).filled())
        }))
        .map_err(draw_err)?;

    let annotation = ("sans-serif", 16)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    chart
        .draw_series(cells.map(|(x, y, v)| {
            let text = if v.is_nan() { "nan".to_string() } else { format!("{v:.2}") };
            Text::new(text, (x, y), annotation.clone())
        }))
        .map_err(draw_err)?;

    Ok(())
}

/// Label for the category whose centre is at `x`, empty between categories.
fn label_at(labels: &[String], x: f64) -> String {
    let idx = x.round();
    if (x - idx).abs() > 1e-6 || idx < 0.0 {
        return String::new();
    }
    labels.get(idx as usize).cloned().unwrap_or_default()
}

/// Min and max of `values` with 10% headroom; never an empty range.
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.1 };
        return (lo - pad, hi + pad);
    }
    let pad = (hi - lo) * 0.1;
    (if lo == 0.0 { 0.0 } else { lo - pad }, hi + pad)
}

/// Format a value as whole dollars with thousands separators, e.g. `$1,234`.
pub fn format_currency(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < 0.0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

fn palette_color(i: usize) -> RGBColor {
    let (r, g, b) = Palette99::pick(i).rgb();
    RGBColor(r, g, b)
}

/// Diverging blue-white-red scale for correlations in `[-1, 1]`.
fn coolwarm(v: f64) -> RGBColor {
    const COOL: (f64, f64, f64) = (59.0, 76.0, 192.0);
    const NEUTRAL: (f64, f64, f64) = (221.0, 221.0, 221.0);
    const WARM: (f64, f64, f64) = (180.0, 4.0, 38.0);

    if v.is_nan() {
        return NAN_COLOR;
    }
    let t = v.clamp(-1.0, 1.0);
    let (from, to, w) = if t < 0.0 { (NEUTRAL, COOL, -t) } else { (NEUTRAL, WARM, t) };
    let mix = |a: f64, b: f64| (a + (b - a) * w).round() as u8;
    RGBColor(mix(from.0, to.0), mix(from.1, to.1), mix(from.2, to.2))
}
