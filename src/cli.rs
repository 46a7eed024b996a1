//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;

use crate::analysis::{DEFAULT_BINS, DEFAULT_CLUSTERS, DEFAULT_TOP_N};
use crate::pipeline::{AnalysisKind, PipelineConfig, PlotKind};

/// Data analysis tool with visualization for spending transactions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the CSV file
    pub csv_path: PathBuf,

    /// Type of analysis to perform
    #[arg(long, value_enum)]
    pub analysis: Option<AnalysisKind>,

    /// Type of visualization to generate
    #[arg(long, value_enum)]
    pub plot: Option<PlotKind>,

    /// Path to save the generated plot (png, jpg, bmp or svg)
    #[arg(short, long, env = "SPENDLENS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Number of categories kept by top-categories
    #[arg(long, default_value_t = DEFAULT_TOP_N)]
    pub top_n: usize,

    /// Number of clusters for segments
    #[arg(short = 'k', long, default_value_t = DEFAULT_CLUSTERS)]
    pub clusters: usize,

    /// Number of bins for distribution and histogram
    #[arg(
        long,
        default_value_t = DEFAULT_BINS,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub bins: usize,

    /// Only analyse these categories (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub categories: Vec<String>,

    /// Only analyse records on or after this date (YYYY-MM-DD)
    #[arg(long, requires = "to")]
    pub from: Option<NaiveDate>,

    /// Only analyse records on or before this date (YYYY-MM-DD)
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "spendlens=info"
        } else {
            "warn"
        }
    }
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        let mut config = PipelineConfig::new(&args.csv_path);
        config.analysis = args.analysis;
        config.plot = args.plot;
        config.output = args.output.clone();
        config.top_n = args.top_n;
        config.clusters = args.clusters;
        config.bins = args.bins;
        config.categories = args.categories.clone();
        config.date_range = args.from.zip(args.to);
        config
    }
}
