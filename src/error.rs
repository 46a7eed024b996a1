//! Error type shared by every stage of the pipeline

use std::path::PathBuf;

/// Errors raised while loading, analysing or charting a table.
///
/// Load, validation and analysis errors abort the run. `Compatibility` is the
/// one kind the pipeline reports and skips instead of propagating.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("could not parse {} as delimited text: {source}", .path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },

    #[error("missing required columns: {}{}", quoted(.missing), nulls_suffix(.with_nulls))]
    Schema {
        missing: Vec<String>,
        /// Present required columns that also hold nulls.
        with_nulls: Vec<String>,
    },

    #[error("missing values found in columns: {}", quoted(.0))]
    MissingValues(Vec<String>),

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("could not parse '{value}' in column '{column}': {reason}")]
    Parse {
        column: String,
        value: String,
        reason: String,
    },

    #[error("{plot} chart requires {} columns", quoted_and(.required))]
    Compatibility { plot: String, required: Vec<String> },

    #[error("cannot form {clusters} clusters from {rows} rows")]
    InvalidClusterCount { clusters: usize, rows: usize },

    #[error("invalid chart data: {0}")]
    InvalidChartData(String),

    #[error("unsupported image format '{0}' (expected png, jpg, jpeg, bmp or svg)")]
    UnsupportedFormat(String),

    #[error("failed to draw chart: {0}")]
    Render(String),

    #[error("clustering failed: {0}")]
    Clustering(#[from] linfa_clustering::KMeansError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn quoted(names: &[String]) -> String {
    let inner: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    format!("[{}]", inner.join(", "))
}

fn quoted_and(names: &[String]) -> String {
    let inner: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    inner.join(" and ")
}

fn nulls_suffix(with_nulls: &[String]) -> String {
    if with_nulls.is_empty() {
        String::new()
    } else {
        format!("; missing values found in columns: {}", quoted(with_nulls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_message_lists_every_violation() {
        let err = Error::Schema {
            missing: vec!["amount".to_string(), "date".to_string()],
            with_nulls: vec!["category".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing required columns: ['amount', 'date']; missing values found in columns: ['category']"
        );
    }

    #[test]
    fn test_compatibility_message() {
        let err = Error::Compatibility {
            plot: "Line".to_string(),
            required: vec!["date".to_string(), "amount".to_string()],
        };
        assert_eq!(err.to_string(), "Line chart requires 'date' and 'amount' columns");
    }
}
