//! SpendLens: spending analysis and charting CLI
//!
//! Loads a transaction CSV, runs the requested analysis, prints the result
//! and renders the requested chart.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use spendlens::{Args, Pipeline, PipelineConfig, PlotOutcome};
use tracing::info_span;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    init_tracing(&args);

    if args.verbose {
        println!("SpendLens - Spending Analysis");
        println!("=============================\n");
    }

    let start_time = Instant::now();
    let pipeline = Pipeline::new(PipelineConfig::from(&args), info_span!("spendlens"));

    let analyzer = pipeline
        .load()
        .with_context(|| format!("failed to load {}", args.csv_path.display()))?;
    if args.verbose {
        println!("✓ Data loaded: {} records", analyzer.data().height());
    }

    let result = pipeline.analyze(&analyzer).context("analysis failed")?;
    if let Some(kind) = args.analysis {
        println!("\n{}:", kind.header());
        println!("{result}");
    }

    match pipeline.visualize(&result).context("failed to render chart")? {
        PlotOutcome::NotRequested => {}
        PlotOutcome::Rendered {
            path,
            preview: false,
            ..
        } => println!("\n✓ Chart saved to: {}", path.display()),
        PlotOutcome::Rendered {
            path,
            preview: true,
            ..
        } => println!("\n✓ Chart preview written to: {}", path.display()),
        PlotOutcome::Skipped(reason) => println!("\n✗ Chart skipped: {reason}"),
    }

    if args.verbose {
        println!(
            "\nTotal processing time: {:.2}s",
            start_time.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
