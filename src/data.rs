//! CSV loading and schema validation using Polars

use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{info, warn, Span};

use crate::error::Error;

/// Columns every transaction file must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["date", "category", "amount", "customer_id"];

/// Load a CSV file with a header row into a `DataFrame`.
///
/// Empty fields load as nulls so that [`validate_table`] can report them.
pub fn load_table(path: impl AsRef<Path>) -> crate::Result<DataFrame> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }

    let format_err = |source| Error::Format {
        path: path.to_path_buf(),
        source,
    };

    LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()
        .map_err(format_err)?
        .collect()
        .map_err(format_err)
}

/// Check that every required column exists and holds no nulls.
///
/// Both checks always run so the error names every violation at once.
pub fn validate_table<S: AsRef<str>>(df: &DataFrame, required_columns: &[S]) -> crate::Result<()> {
    let mut missing = Vec::new();
    let mut with_nulls = Vec::new();

    for name in required_columns.iter().map(AsRef::as_ref) {
        match df.column(name) {
            Ok(series) => {
                if has_missing_values(series)? {
                    with_nulls.push(name.to_string());
                }
            }
            Err(_) => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::Schema {
            missing,
            with_nulls,
        });
    }
    if !with_nulls.is_empty() {
        return Err(Error::MissingValues(with_nulls));
    }
    Ok(())
}

/// Nulls count as missing, and so do blank strings.
fn has_missing_values(series: &Series) -> crate::Result<bool> {
    if series.null_count() > 0 {
        return Ok(true);
    }
    if series.dtype() == &DataType::String {
        let blank = series
            .str()?
            .into_iter()
            .any(|v| v.map_or(true, |s| s.trim().is_empty()));
        return Ok(blank);
    }
    Ok(false)
}

/// Fail with `ColumnNotFound` unless `df` has a column called `name`.
pub fn require_column(df: &DataFrame, name: &str) -> crate::Result<()> {
    if df.get_column_names().iter().any(|c| *c == name) {
        Ok(())
    } else {
        Err(Error::ColumnNotFound(name.to_string()))
    }
}

/// Make `column` numeric, parsing text cells as `f64`.
///
/// Fails with `Parse` on the first cell that is not a number. Numeric columns
/// are left untouched.
pub fn coerce_numeric(df: &mut DataFrame, column: &str) -> crate::Result<()> {
    require_column(df, column)?;
    let series = df.column(column)?;
    let parsed = match series.dtype() {
        dtype if dtype.is_numeric() => return Ok(()),
        DataType::String => {
            let mut values = Vec::with_capacity(series.len());
            for cell in series.str()?.into_iter() {
                let number = match cell {
                    Some(text) => Some(text.trim().parse::<f64>().map_err(|e| Error::Parse {
                        column: column.to_string(),
                        value: text.to_string(),
                        reason: e.to_string(),
                    })?),
                    None => None,
                };
                values.push(number);
            }
            Series::new(column, values)
        }
        other => {
            return Err(Error::Parse {
                column: column.to_string(),
                value: other.to_string(),
                reason: "expected a numeric column".to_string(),
            })
        }
    };
    df.with_column(parsed)?;
    Ok(())
}

/// Keep rows whose `column` value, rendered as text, is one of `categories`.
pub fn filter_by_categories<S: AsRef<str>>(
    df: &DataFrame,
    column: &str,
    categories: &[S],
) -> crate::Result<DataFrame> {
    require_column(df, column)?;

    let as_text = df.column(column)?.cast(&DataType::String)?;
    let mask: Vec<bool> = as_text
        .str()?
        .into_iter()
        .map(|v| v.is_some_and(|v| categories.iter().any(|c| c.as_ref() == v)))
        .collect();

    Ok(df.filter(&BooleanChunked::from_slice("mask", &mask))?)
}

/// Loads and validates one input file, logging through a caller-owned span.
#[derive(Debug, Clone)]
pub struct DataLoader {
    path: PathBuf,
    required_columns: Vec<String>,
    span: Span,
}

impl DataLoader {
    pub fn new(path: impl Into<PathBuf>, required_columns: &[&str], span: Span) -> Self {
        Self {
            path: path.into(),
            required_columns: required_columns.iter().map(|c| c.to_string()).collect(),
            span,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> crate::Result<DataFrame> {
        info!(parent: &self.span, path = %self.path.display(), "loading table");
        let df = load_table(&self.path)?;
        info!(parent: &self.span, rows = df.height(), columns = df.width(), "table loaded");
        Ok(df)
    }

    pub fn validate(&self, df: &DataFrame) -> crate::Result<()> {
        validate_table(df, &self.required_columns).inspect_err(|e| {
            warn!(parent: &self.span, error = %e, "validation failed");
        })
    }

    /// Load the file and validate it against the required columns.
    pub fn load_validated(&self) -> crate::Result<DataFrame> {
        let df = self.load()?;
        self.validate(&df)?;
        Ok(df)
    }
}
