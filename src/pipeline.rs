//! Wires the selected analysis and chart to the loader, analyzer and visualizer

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::ValueEnum;
use polars::prelude::*;
use tracing::{info, info_span, warn, Span};

use crate::analysis::{numeric_values, Analyzer, DEFAULT_BINS, DEFAULT_CLUSTERS, DEFAULT_TOP_N};
use crate::data::{coerce_numeric, filter_by_categories, DataLoader, REQUIRED_COLUMNS};
use crate::error::Error;
use crate::viz::{ChartKind, ChartOptions, Figure, Visualizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AnalysisKind {
    /// Mean, median and standard deviation per category
    Summary,
    /// Monthly totals
    TimeSeries,
    /// Categories with the largest totals
    TopCategories,
    /// Histogram of amounts
    Distribution,
    /// K-Means clusters over amounts
    Segments,
}

impl AnalysisKind {
    /// Header printed above the result table.
    pub fn header(self) -> &'static str {
        match self {
            AnalysisKind::Summary => "Summary Statistics",
            AnalysisKind::TimeSeries => "Time-Series Data",
            AnalysisKind::TopCategories => "Top Spending Categories",
            AnalysisKind::Distribution => "Spending Distribution",
            AnalysisKind::Segments => "Customer Segments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlotKind {
    Bar,
    Line,
    Pie,
    Heatmap,
    Histogram,
}

impl PlotKind {
    pub fn chart_kind(self) -> ChartKind {
        match self {
            PlotKind::Bar => ChartKind::Bar,
            PlotKind::Line => ChartKind::Line,
            PlotKind::Pie => ChartKind::Pie,
            PlotKind::Heatmap => ChartKind::Heatmap,
            PlotKind::Histogram => ChartKind::Histogram,
        }
    }
}

/// Everything one run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub csv_path: PathBuf,
    pub analysis: Option<AnalysisKind>,
    pub plot: Option<PlotKind>,
    pub output: Option<PathBuf>,
    pub date_column: String,
    pub category_column: String,
    pub value_column: String,
    pub top_n: usize,
    pub clusters: usize,
    pub bins: usize,
    /// Keep only these categories; empty keeps all.
    pub categories: Vec<String>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl PipelineConfig {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
            analysis: None,
            plot: None,
            output: None,
            date_column: "date".to_string(),
            category_column: "category".to_string(),
            value_column: "amount".to_string(),
            top_n: DEFAULT_TOP_N,
            clusters: DEFAULT_CLUSTERS,
            bins: DEFAULT_BINS,
            categories: Vec::new(),
            date_range: None,
        }
    }
}

/// What happened to the requested chart.
#[derive(Debug)]
pub enum PlotOutcome {
    NotRequested,
    /// The chart was written to `path`; `preview` means no output was requested
    /// and `path` is a scratch file for viewing.
    Rendered {
        figure: Figure,
        path: PathBuf,
        preview: bool,
    },
    /// The result table lacks what the chart needs; nothing was drawn.
    Skipped(Error),
}

#[derive(Debug)]
pub struct PipelineReport {
    pub result: DataFrame,
    pub plot: PlotOutcome,
}

/// One load, analyse, visualise pass.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    span: Span,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, span: Span) -> Self {
        Self { config, span }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load and validate the input, then apply the configured filters.
    pub fn load(&self) -> crate::Result<Analyzer> {
        let loader = DataLoader::new(
            &self.config.csv_path,
            &REQUIRED_COLUMNS,
            info_span!(parent: &self.span, "loader"),
        );
        let mut data = loader.load_validated()?;
        coerce_numeric(&mut data, &self.config.value_column)?;
        if !self.config.categories.is_empty() {
            data = filter_by_categories(&data, &self.config.category_column, &self.config.categories)?;
        }

        let analyzer = Analyzer::new(
            data,
            &self.config.date_column,
            info_span!(parent: &self.span, "analyzer"),
        )?;
        match self.config.date_range {
            Some((start, end)) => analyzer.filter_by_date_range(start, end),
            None => Ok(analyzer),
        }
    }

    /// Run the configured analysis; without one, the parsed table itself is the result.
    pub fn analyze(&self, analyzer: &Analyzer) -> crate::Result<DataFrame> {
        let c = &self.config;
        match c.analysis {
            Some(AnalysisKind::Summary) => analyzer.summary_statistics(&c.category_column),
            Some(AnalysisKind::TimeSeries) => analyzer.time_series(&c.value_column),
            Some(AnalysisKind::TopCategories) => {
                analyzer.top_categories(&c.category_column, &c.value_column, c.top_n)
            }
            Some(AnalysisKind::Distribution) => analyzer.spending_distribution(&c.value_column, c.bins),
            Some(AnalysisKind::Segments) => {
                analyzer.segment_customers(&[c.value_column.as_str()], c.clusters)
            }
            None => Ok(analyzer.data().clone()),
        }
    }

    /// Draw the configured chart from `result`.
    ///
    /// A result that lacks the chart's columns yields [`PlotOutcome::Skipped`]
    /// instead of an error.
    pub fn visualize(&self, result: &DataFrame) -> crate::Result<PlotOutcome> {
        let Some(plot) = self.config.plot else {
            return Ok(PlotOutcome::NotRequested);
        };
        if let Err(e) = self.check_compatible(plot, result) {
            warn!(parent: &self.span, error = %e, "skipping chart");
            return Ok(PlotOutcome::Skipped(e));
        }

        let (path, preview) = match &self.config.output {
            Some(path) => {
                create_parent_dirs(path)?;
                (path.clone(), false)
            }
            None => (preview_path(plot), true),
        };

        let c = &self.config;
        let viz = Visualizer::new(result.clone(), info_span!(parent: &self.span, "visualizer"));
        let options = ChartOptions::for_kind(plot.chart_kind());
        let save = Some(path.as_path());

        let figure = match plot {
            PlotKind::Bar => viz.bar_chart(&c.category_column, &c.value_column, &options, save)?,
            PlotKind::Line => viz.line_chart(&c.date_column, &c.value_column, &options, save)?,
            PlotKind::Pie => {
                let values = numeric_values(result, &c.value_column)?;
                let labels = text_values(result, &c.category_column)?;
                viz.pie_chart(&values, &labels, &options, save)?
            }
            PlotKind::Heatmap => viz.heatmap(result, &options, save)?,
            PlotKind::Histogram => viz.histogram(&c.value_column, c.bins, &options, save)?,
        };
        info!(parent: &self.span, path = %path.display(), preview, "chart written");

        Ok(PlotOutcome::Rendered {
            figure,
            path,
            preview,
        })
    }

    pub fn run(&self) -> crate::Result<PipelineReport> {
        let analyzer = self.load()?;
        let result = self.analyze(&analyzer)?;
        let plot = self.visualize(&result)?;
        Ok(PipelineReport { result, plot })
    }

    fn check_compatible(&self, plot: PlotKind, result: &DataFrame) -> crate::Result<()> {
        let c = &self.config;
        let required: Vec<&str> = match plot {
            PlotKind::Bar | PlotKind::Pie => vec![c.category_column.as_str(), c.value_column.as_str()],
            PlotKind::Line => vec![c.date_column.as_str(), c.value_column.as_str()],
            PlotKind::Histogram => vec![c.value_column.as_str()],
            PlotKind::Heatmap => {
                if result.get_columns().iter().any(|s| s.dtype().is_numeric()) {
                    return Ok(());
                }
                vec!["numeric"]
            }
        };

        let present = result.get_column_names();
        if required.iter().all(|r| present.contains(r)) {
            Ok(())
        } else {
            Err(Error::Compatibility {
                plot: plot.chart_kind().name().to_string(),
                required: required.into_iter().map(String::from).collect(),
            })
        }
    }
}

fn create_parent_dirs(path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn preview_path(plot: PlotKind) -> PathBuf {
    let name = plot.chart_kind().name().to_ascii_lowercase();
    std::env::temp_dir().join(format!("spendlens-{name}.svg"))
}

fn text_values(df: &DataFrame, column: &str) -> crate::Result<Vec<String>> {
    let text = df.column(column)?.cast(&DataType::String)?;
    Ok(text
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or("null").to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,category,amount,customer_id").unwrap();
        writeln!(file, "2023-01-01,A,100,1").unwrap();
        writeln!(file, "2023-01-02,B,200,2").unwrap();
        writeln!(file, "2023-02-03,A,300,1").unwrap();
        file
    }

    fn pipeline(config: PipelineConfig) -> Pipeline {
        Pipeline::new(config, Span::none())
    }

    #[test]
    fn test_raw_table_without_analysis() {
        let file = create_test_csv();
        let p = pipeline(PipelineConfig::new(file.path()));

        let analyzer = p.load().unwrap();
        let result = p.analyze(&analyzer).unwrap();
        assert_eq!(result.height(), 3);
        assert_eq!(result.width(), 4);
    }

    #[test]
    fn test_plot_not_requested() {
        let file = create_test_csv();
        let mut config = PipelineConfig::new(file.path());
        config.analysis = Some(AnalysisKind::TopCategories);

        let report = pipeline(config).run().unwrap();
        assert_eq!(report.result.height(), 2);
        assert!(matches!(report.plot, PlotOutcome::NotRequested));
    }

    #[test]
    fn test_incompatible_plot_is_skipped() {
        let file = create_test_csv();
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::new(file.path());
        config.analysis = Some(AnalysisKind::TopCategories);
        config.plot = Some(PlotKind::Line);
        config.output = Some(dir.path().join("line.png"));

        let report = pipeline(config).run().unwrap();
        match report.plot {
            PlotOutcome::Skipped(Error::Compatibility { plot, required }) => {
                assert_eq!(plot, "Line");
                assert_eq!(required, vec!["date", "amount"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!dir.path().join("line.png").exists());
    }

    #[test]
    fn test_output_directories_are_created() {
        let file = create_test_csv();
        let dir = tempdir().unwrap();
        let output = dir.path().join("nested").join("charts").join("top.svg");

        let mut config = PipelineConfig::new(file.path());
        config.analysis = Some(AnalysisKind::TopCategories);
        config.plot = Some(PlotKind::Pie);
        config.output = Some(output.clone());

        let report = pipeline(config).run().unwrap();
        match report.plot {
            PlotOutcome::Rendered { figure, path, preview } => {
                assert_eq!(path, output);
                assert!(!preview);
                assert_eq!(figure.pie_slices().map(|s| s.len()), Some(2));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(output.exists());
    }

    #[test]
    fn test_filters_are_applied_on_load() {
        let file = create_test_csv();
        let mut config = PipelineConfig::new(file.path());
        config.categories = vec!["A".to_string()];
        config.date_range = Some((
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 2, 28).unwrap(),
        ));

        let analyzer = pipeline(config).load().unwrap();
        assert_eq!(analyzer.data().height(), 1);
    }

    #[test]
    fn test_load_errors_are_fatal() {
        let p = pipeline(PipelineConfig::new("/no/such/file.csv"));
        assert!(matches!(p.run(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_text_amount_fails_before_analysis() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,category,amount,customer_id").unwrap();
        writeln!(file, "2023-01-01,A,100,1").unwrap();
        writeln!(file, "2023-01-02,B,abc,2").unwrap();

        let mut config = PipelineConfig::new(file.path());
        config.analysis = Some(AnalysisKind::Summary);

        match pipeline(config).run() {
            Err(Error::Parse { column, value, .. }) => {
                assert_eq!(column, "amount");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
