use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use mv_scout::config::PipelineConfig;
use mv_scout::freshness::FreshnessScheduler;
use mv_scout::pipeline::{Pipeline, RunMode};
use mv_scout::source::WebSource;
use mv_scout::store::SqliteStore;

struct Args {
    mode: RunMode,
    data_dir: Option<PathBuf>,
    offset_days: Option<i64>,
    force: bool,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args(std::env::args().skip(1).collect())?;
    let mut config = PipelineConfig::from_env().context("load configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(days) = args.offset_days {
        config.offset_days = days;
    }

    let mut store = SqliteStore::new(config.data_dir.clone());
    let mut source = WebSource::new(config.fetch_policy())?;
    let scheduler = FreshnessScheduler::new(config.offset_days, args.force);
    let report = Pipeline::new(&config, &mut store, &mut source, scheduler).run(args.mode)?;

    println!("mv_scout {} complete", args.mode);
    println!("Data dir: {}", config.data_dir.display());
    println!("Fetched: {}", report.fetched.join(", "));
    if !report.skipped.is_empty() {
        println!("Fresh (skipped): {}", report.skipped.join(", "));
    }
    println!("Rows written: {}", report.rows_written);
    for group in &report.groups {
        println!(
            " - {}: {} players, {} with market value, {} raw / {} embedding features",
            group.group,
            group.rows,
            group.trained_rows,
            group.raw_features.len(),
            group.embedding_features.len()
        );
    }
    if !report.failed.is_empty() {
        println!("Errors: {}", report.failed.len());
        for (unit, err) in report.failed.iter().take(8) {
            println!(" - {unit}: {err}");
        }
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Args> {
    let mut parsed = Args {
        mode: RunMode::All,
        data_dir: None,
        offset_days: None,
        force: false,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(dir) = arg.strip_prefix("--data-dir=") {
            parsed.data_dir = Some(PathBuf::from(dir.trim()));
        } else if arg == "--data-dir" {
            let dir = iter.next().context("--data-dir needs a path")?;
            parsed.data_dir = Some(PathBuf::from(dir.trim()));
        } else if let Some(days) = arg.strip_prefix("--offset-days=") {
            parsed.offset_days = Some(days.trim().parse().context("--offset-days")?);
        } else if arg == "--offset-days" {
            let days = iter.next().context("--offset-days needs a number")?;
            parsed.offset_days = Some(days.trim().parse().context("--offset-days")?);
        } else if arg == "--force" {
            parsed.force = true;
        } else {
            parsed.mode = arg.parse()?;
        }
    }
    Ok(parsed)
}
