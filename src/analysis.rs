//! Aggregate analyses over a validated transaction table

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::{debug, info, Span};

use crate::data::require_column;
use crate::error::Error;
use crate::model::{self, SEGMENT_SEED};

/// Rows returned by [`Analyzer::top_categories`] unless told otherwise.
pub const DEFAULT_TOP_N: usize = 10;
/// Cluster count used by [`Analyzer::segment_customers`] unless told otherwise.
pub const DEFAULT_CLUSTERS: usize = 3;
/// Bin count used by [`Analyzer::spending_distribution`] unless told otherwise.
pub const DEFAULT_BINS: usize = 30;

const MILLIS_PER_DAY: i64 = 86_400_000;

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Runs analyses over a table whose date column has been parsed to timestamps.
///
/// Every operation returns a new `DataFrame`; the held table is never mutated.
#[derive(Debug, Clone)]
pub struct Analyzer {
    data: DataFrame,
    date_column: String,
    span: Span,
}

impl Analyzer {
    /// Parse `date_column` into millisecond timestamps and take ownership of `data`.
    pub fn new(mut data: DataFrame, date_column: &str, span: Span) -> crate::Result<Self> {
        require_column(&data, date_column)?;
        let parsed = parse_date_column(data.column(date_column)?)?;
        data.with_column(parsed)?;
        info!(parent: &span, rows = data.height(), date_column, "analyzer initialised");

        Ok(Self {
            data,
            date_column: date_column.to_string(),
            span,
        })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    /// Mean, median and sample standard deviation of every numeric column per category.
    ///
    /// Output columns are named `<field>_mean`, `<field>_median` and `<field>_std`,
    /// one row per category in ascending order.
    pub fn summary_statistics(&self, category_column: &str) -> crate::Result<DataFrame> {
        require_column(&self.data, category_column)?;
        info!(parent: &self.span, category_column, "calculating summary statistics");

        let numeric: Vec<String> = self
            .data
            .get_columns()
            .iter()
            .filter(|s| s.dtype().is_numeric())
            .map(|s| s.name().to_string())
            .filter(|name| name != category_column)
            .collect();

        let aggs: Vec<Expr> = numeric
            .iter()
            .flat_map(|c| {
                [
                    col(c).mean().alias(&format!("{c}_mean")),
                    col(c).median().alias(&format!("{c}_median")),
                    col(c).std(1).alias(&format!("{c}_std")),
                ]
            })
            .collect();

        let summary = self
            .data
            .clone()
            .lazy()
            .group_by([col(category_column)])
            .agg(aggs)
            .sort([category_column], SortMultipleOptions::default())
            .collect()?;

        debug!(parent: &self.span, groups = summary.height(), "summary statistics ready");
        Ok(summary)
    }

    /// Sum `value_column` per calendar month, oldest month first.
    ///
    /// Months without records are omitted rather than zero-filled.
    pub fn time_series(&self, value_column: &str) -> crate::Result<DataFrame> {
        require_column(&self.data, value_column)?;
        info!(parent: &self.span, value_column, "performing time series analysis");

        let date = self.date_column.as_str();
        let monthly = self
            .data
            .clone()
            .lazy()
            .select([
                col(date).dt().year().alias("year"),
                col(date).dt().month().cast(DataType::Int32).alias("month"),
                col(value_column),
            ])
            .group_by([col("year"), col("month")])
            .agg([col(value_column).sum()])
            .sort(["year", "month"], SortMultipleOptions::default())
            .collect()?;

        let years = monthly.column("year")?.cast(&DataType::Int32)?;
        let months = monthly.column("month")?.cast(&DataType::Int32)?;

        let mut labels = Vec::with_capacity(monthly.height());
        let mut starts = Vec::with_capacity(monthly.height());
        for (year, month) in years.i32()?.into_iter().zip(months.i32()?.into_iter()) {
            let (Some(year), Some(month)) = (year, month) else {
                continue;
            };
            let first = NaiveDate::from_ymd_opt(year, month as u32, 1).ok_or_else(|| Error::Parse {
                column: date.to_string(),
                value: format!("{year}-{month:02}"),
                reason: "not a calendar month".to_string(),
            })?;
            labels.push(format!("{year}-{month:02}"));
            starts.push(days_since_epoch(first));
        }

        let month_col = Series::new("month", labels);
        let date_col = Series::new(date, starts).cast(&DataType::Date)?;
        let sums = monthly.column(value_column)?.clone();

        Ok(DataFrame::new(vec![month_col, date_col, sums])?)
    }

    /// Sum `value_column` per category and keep the `top_n` largest.
    ///
    /// Equal sums keep the order in which their categories first appear.
    pub fn top_categories(
        &self,
        category_column: &str,
        value_column: &str,
        top_n: usize,
    ) -> crate::Result<DataFrame> {
        require_column(&self.data, category_column)?;
        require_column(&self.data, value_column)?;
        info!(parent: &self.span, category_column, value_column, top_n, "getting top categories");

        let top = self
            .data
            .clone()
            .lazy()
            .group_by_stable([col(category_column)])
            .agg([col(value_column).sum()])
            .sort(
                [value_column],
                SortMultipleOptions::default()
                    .with_order_descending(true)
                    .with_maintain_order(true),
            )
            .limit(top_n as IdxSize)
            .collect()?;

        Ok(top)
    }

    /// Assign each row to one of `n_clusters` k-means clusters over `value_columns`.
    ///
    /// Returns a new table of `cluster` followed by the value columns.
    pub fn segment_customers<S: AsRef<str>>(
        &self,
        value_columns: &[S],
        n_clusters: usize,
    ) -> crate::Result<DataFrame> {
        for c in value_columns {
            require_column(&self.data, c.as_ref())?;
        }
        info!(
            parent: &self.span,
            columns = value_columns.len(),
            n_clusters,
            "performing customer segmentation"
        );

        let features = model::feature_matrix(&self.data, value_columns)?;
        let fitted = model::fit_kmeans(
            &features,
            n_clusters,
            SEGMENT_SEED,
            model::DEFAULT_MAX_ITERS,
            model::DEFAULT_TOLERANCE,
        )?;
        debug!(parent: &self.span, inertia = fitted.inertia, sizes = ?fitted.cluster_sizes(), "k-means fitted");

        let cluster: Vec<u32> = fitted.labels.iter().map(|&l| l as u32).collect();
        let mut columns = vec![Series::new("cluster", cluster)];
        for c in value_columns {
            columns.push(self.data.column(c.as_ref())?.clone());
        }
        Ok(DataFrame::new(columns)?)
    }

    /// Bucket `value_column` into `bins` equal-width bins.
    pub fn spending_distribution(&self, value_column: &str, bins: usize) -> crate::Result<DataFrame> {
        require_column(&self.data, value_column)?;
        info!(parent: &self.span, value_column, bins, "computing spending distribution");

        let values = numeric_values(&self.data, value_column)?;
        let bins = histogram_bins(&values, bins)?;

        Ok(DataFrame::new(vec![
            Series::new("bin_start", bins.iter().map(|b| b.start).collect::<Vec<_>>()),
            Series::new("bin_end", bins.iter().map(|b| b.end).collect::<Vec<_>>()),
            Series::new("count", bins.iter().map(|b| b.count).collect::<Vec<_>>()),
        ])?)
    }

    /// A new analyzer over the rows dated within `start..=end`.
    pub fn filter_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> crate::Result<Self> {
        let from = days_since_epoch(start) as i64 * MILLIS_PER_DAY;
        let until = (days_since_epoch(end) as i64 + 1) * MILLIS_PER_DAY;

        let millis = self.data.column(&self.date_column)?.cast(&DataType::Int64)?;
        let mask: Vec<bool> = millis
            .i64()?
            .into_iter()
            .map(|ts| ts.is_some_and(|ts| ts >= from && ts < until))
            .collect();
        let filtered = self.data.filter(&BooleanChunked::from_slice("mask", &mask))?;
        info!(parent: &self.span, %start, %end, rows = filtered.height(), "filtered by date range");

        Ok(Self {
            data: filtered,
            date_column: self.date_column.clone(),
            span: self.span.clone(),
        })
    }
}

/// One equal-width histogram bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: u32,
}

/// Split `values` into `bins` equal-width buckets between their min and max.
///
/// The last bucket is closed on the right. When every value is equal the range
/// is widened by half a unit on each side.
pub fn histogram_bins(values: &[f64], bins: usize) -> crate::Result<Vec<Bin>> {
    if bins == 0 {
        return Err(Error::InvalidChartData("bin count must be at least 1".to_string()));
    }
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Ok(Vec::new());
    }

    let mut lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let width = (hi - lo) / bins as f64;

    let mut out: Vec<Bin> = (0..bins)
        .map(|i| Bin {
            start: lo + width * i as f64,
            end: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();

    for v in finite {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    Ok(out)
}

/// Values of a numeric column as `f64`, failing on text columns and nulls.
pub(crate) fn numeric_values(df: &DataFrame, column: &str) -> crate::Result<Vec<f64>> {
    require_column(df, column)?;
    let series = df.column(column)?;
    if !series.dtype().is_numeric() {
        return Err(Error::Parse {
            column: column.to_string(),
            value: series.dtype().to_string(),
            reason: "expected a numeric column".to_string(),
        });
    }
    if series.null_count() > 0 {
        return Err(Error::MissingValues(vec![column.to_string()]));
    }
    let values = series.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_no_null_iter().collect())
}

/// Convert a text, date or datetime column into `Datetime(Milliseconds)`.
fn parse_date_column(series: &Series) -> crate::Result<Series> {
    let target = DataType::Datetime(TimeUnit::Milliseconds, None);
    match series.dtype() {
        DataType::Date | DataType::Datetime(_, _) => Ok(series.cast(&target)?),
        DataType::String => {
            let mut millis = Vec::with_capacity(series.len());
            for value in series.str()?.into_iter() {
                let parsed = value.and_then(parse_timestamp).ok_or_else(|| Error::Parse {
                    column: series.name().to_string(),
                    value: value.unwrap_or_default().to_string(),
                    reason: "not a recognised date".to_string(),
                })?;
                millis.push(parsed.and_utc().timestamp_millis());
            }
            Ok(Series::new(series.name(), millis).cast(&target)?)
        }
        other => Err(Error::Parse {
            column: series.name().to_string(),
            value: other.to_string(),
            reason: "expected a date column".to_string(),
        }),
    }
}

/// Parse the date and datetime spellings accepted in input files.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        // wall-clock time at the recorded offset
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        df!(
            "date" => ["2023-01-01", "2023-01-02", "2023-01-03"],
            "category" => ["A", "B", "A"],
            "amount" => [100i64, 200, 300],
            "customer_id" => [1i64, 2, 3],
        )
        .unwrap()
    }

    fn six_rows() -> DataFrame {
        df!(
            "date" => ["2023-01-01", "2023-01-02", "2023-01-03", "2023-01-04", "2023-01-05", "2023-01-06"],
            "category" => ["A", "B", "A", "C", "B", "A"],
            "amount" => [100i64, 200, 300, 400, 500, 600],
        )
        .unwrap()
    }

    fn analyzer(df: DataFrame) -> Analyzer {
        Analyzer::new(df, "date", Span::none()).unwrap()
    }

    fn strings(df: &DataFrame, column: &str) -> Vec<String> {
        df.column(column)
            .unwrap()
            .cast(&DataType::String)
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .map(str::to_string)
            .collect()
    }

    fn floats(df: &DataFrame, column: &str) -> Vec<f64> {
        df.column(column)
            .unwrap()
            .cast(&DataType::Float64)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    #[test]
    fn test_date_column_is_parsed() {
        let a = analyzer(sample());
        assert_eq!(
            a.data().column("date").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
    }

    #[test]
    fn test_unparseable_date() {
        let df = df!(
            "date" => ["2023-01-01", "yesterday"],
            "amount" => [1i64, 2],
        )
        .unwrap();
        let err = Analyzer::new(df, "date", Span::none()).unwrap_err();
        assert!(matches!(err, Error::Parse { ref value, .. } if value == "yesterday"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        for input in [
            "2023-01-05",
            "2023/01/05",
            "01/05/2023",
            "2023-01-05 10:30:00",
            "2023-01-05T10:30:00",
            "2023-01-05T10:30:00Z",
        ] {
            let parsed = parse_timestamp(input).unwrap_or_else(|| panic!("failed on {input}"));
            assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2023, 1, 5).unwrap());
        }
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn test_offset_timestamps_keep_local_month() {
        let parsed = parse_timestamp("2023-01-31T23:00:00-05:00").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2023, 1, 31).unwrap());

        let df = df!(
            "date" => ["2023-01-31T23:00:00-05:00", "2023-02-01T10:00:00-05:00"],
            "amount" => [10i64, 20],
        )
        .unwrap();
        let series = analyzer(df).time_series("amount").unwrap();
        assert_eq!(strings(&series, "month"), vec!["2023-01", "2023-02"]);
        assert_eq!(floats(&series, "amount"), vec![10.0, 20.0]);
    }

    #[test]
    fn test_summary_statistics() {
        let summary = analyzer(six_rows()).summary_statistics("category").unwrap();

        assert_eq!(summary.height(), 3);
        assert_eq!(strings(&summary, "category"), vec!["A", "B", "C"]);
        let means = floats(&summary, "amount_mean");
        assert!((means[0] - 1000.0 / 3.0).abs() < 1e-9);
        assert_eq!(&means[1..], &[350.0, 400.0]);
        assert_eq!(floats(&summary, "amount_median"), vec![300.0, 350.0, 400.0]);

        let std_a = floats(&summary, "amount_std")[0];
        assert!((std_a - 251.661_147_842_358).abs() < 1e-6);
    }

    #[test]
    fn test_summary_unknown_column() {
        let err = analyzer(sample()).summary_statistics("segment").unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(c) if c == "segment"));
    }

    #[test]
    fn test_time_series_single_month() {
        let ts = analyzer(sample()).time_series("amount").unwrap();

        assert_eq!(ts.height(), 1);
        assert_eq!(strings(&ts, "month"), vec!["2023-01"]);
        assert_eq!(floats(&ts, "amount"), vec![600.0]);
    }

    #[test]
    fn test_time_series_is_chronological_without_gaps_filled() {
        let df = df!(
            "date" => ["2023-03-10", "2022-12-31", "2023-03-01", "2023-01-15"],
            "amount" => [1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let ts = analyzer(df).time_series("amount").unwrap();

        assert_eq!(strings(&ts, "month"), vec!["2022-12", "2023-01", "2023-03"]);
        assert_eq!(floats(&ts, "amount"), vec![2.0, 4.0, 4.0]);
        assert_eq!(ts.column("date").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn test_top_categories() {
        let top = analyzer(sample()).top_categories("category", "amount", 2).unwrap();

        assert_eq!(strings(&top, "category"), vec!["A", "B"]);
        assert_eq!(floats(&top, "amount"), vec![400.0, 200.0]);
    }

    #[test]
    fn test_top_categories_caps_at_distinct_count() {
        let top = analyzer(six_rows())
            .top_categories("category", "amount", DEFAULT_TOP_N)
            .unwrap();
        assert_eq!(top.height(), 3);
        assert_eq!(floats(&top, "amount"), vec![1000.0, 700.0, 400.0]);
    }

    #[test]
    fn test_top_categories_ties_keep_first_appearance() {
        let df = df!(
            "date" => ["2023-01-01", "2023-01-02", "2023-01-03"],
            "category" => ["Z", "M", "A"],
            "amount" => [5i64, 5, 5],
        )
        .unwrap();
        let top = analyzer(df).top_categories("category", "amount", 3).unwrap();
        assert_eq!(strings(&top, "category"), vec!["Z", "M", "A"]);
    }

    #[test]
    fn test_top_categories_unknown_value_column() {
        let err = analyzer(sample())
            .top_categories("category", "price", 3)
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound(c) if c == "price"));
    }

    #[test]
    fn test_segment_customers() {
        let a = analyzer(six_rows());
        let segments = a.segment_customers(&["amount"], DEFAULT_CLUSTERS).unwrap();

        assert_eq!(segments.get_column_names(), vec!["cluster", "amount"]);
        assert_eq!(segments.height(), 6);
        let ids: Vec<u32> = segments
            .column("cluster")
            .unwrap()
            .u32()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert!(ids.iter().all(|&id| id < 3));

        // the analyzer's own table is untouched
        assert!(a.data().column("cluster").is_err());
    }

    #[test]
    fn test_segment_customers_is_deterministic() {
        let a = analyzer(six_rows());
        let first = a.segment_customers(&["amount"], 3).unwrap();
        let second = a.segment_customers(&["amount"], 3).unwrap();
        assert!(first.equals(&second));
    }

    #[test]
    fn test_segment_customers_rejects_text_columns() {
        let err = analyzer(sample())
            .segment_customers(&["category"], 2)
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_spending_distribution() {
        let dist = analyzer(six_rows()).spending_distribution("amount", 5).unwrap();
        assert_eq!(dist.height(), 5);

        let counts: Vec<u32> = dist
            .column("count")
            .unwrap()
            .u32()
            .unwrap()
            .into_no_null_iter()
            .collect();
        // the maximum lands in the last, right-closed bin
        assert_eq!(counts, vec![1, 1, 1, 1, 2]);
    }

    #[test]
    fn test_histogram_bins_constant_values() {
        let bins = histogram_bins(&[7.0, 7.0], 2).unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].start, 6.5);
        assert_eq!(bins[1].end, 7.5);
        assert_eq!(bins.iter().map(|b| b.count).sum::<u32>(), 2);
    }

    #[test]
    fn test_zero_bins_rejected() {
        assert!(matches!(
            histogram_bins(&[1.0, 2.0], 0),
            Err(Error::InvalidChartData(_))
        ));
        let err = analyzer(six_rows()).spending_distribution("amount", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidChartData(_)));
    }

    #[test]
    fn test_filter_by_date_range() {
        let a = analyzer(six_rows());
        let filtered = a
            .filter_by_date_range(
                NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 4).unwrap(),
            )
            .unwrap();
        assert_eq!(filtered.data().height(), 3);
        assert_eq!(floats(filtered.data(), "amount"), vec![200.0, 300.0, 400.0]);
    }
}
