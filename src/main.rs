use anyhow::{Context, Result};
use clap::Parser;
use nyc_school_data::{run_pipeline, write_report, write_unified_csv, PipelineConfig, RunReport};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nyc-school-data")]
#[command(about = "Merge NYC school datasets into one table keyed by DBN", long_about = None)]
struct Cli {
    /// Pipeline config (JSON); the built-in NYC config when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the source files
    #[arg(short, long, env = "SCHOOL_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Unified CSV to write
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// JSON run report to write
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::nyc_default().context("loading built-in config")?,
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(output) = cli.output {
        config.output = output;
    }
    if let Some(report) = cli.report {
        config.report = report;
    }

    info!(
        data_dir = %config.data_dir.display(),
        sources = config.sources.len(),
        "Starting merge"
    );

    let output = run_pipeline(&config).context("merge pipeline failed")?;

    write_unified_csv(&output.table, &config.output)
        .with_context(|| format!("writing {}", config.output.display()))?;
    write_report(&RunReport::new(&output), &config.report)
        .with_context(|| format!("writing {}", config.report.display()))?;

    if output.anomalies.is_empty() {
        info!("No anomalies");
    } else {
        warn!("{}", output.anomalies.summary());
    }
    info!(
        schools = output.table.len(),
        columns = output.table.columns().len(),
        output = %config.output.display(),
        report = %config.report.display(),
        "Done"
    );

    Ok(())
}
