//! SpendLens: a CLI for exploring spending transactions stored as CSV
//!
//! The library loads and validates a transaction table, runs one of several
//! analyses over it (per-category statistics, monthly totals, top categories,
//! amount distribution, K-Means segmentation) and renders the result as a chart.

pub mod analysis;
pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod viz;

// Re-export public items for easier access
pub use analysis::Analyzer;
pub use cli::Args;
pub use data::{load_table, validate_table, DataLoader};
pub use error::Error;
pub use model::{fit_kmeans, KMeansModel};
pub use pipeline::{AnalysisKind, Pipeline, PipelineConfig, PipelineReport, PlotKind, PlotOutcome};
pub use viz::{ChartKind, ChartOptions, Figure, Visualizer};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
