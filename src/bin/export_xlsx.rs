use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use mv_scout::config::PipelineConfig;
use mv_scout::pipeline::POSITION_DATASET;
use mv_scout::store::{SqliteStore, export_workbook};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let dataset = arg_value(&args, "--dataset").unwrap_or_else(|| POSITION_DATASET.to_string());
    let data_dir = match arg_value(&args, "--data-dir") {
        Some(dir) => PathBuf::from(dir),
        None => PipelineConfig::from_env().context("load configuration")?.data_dir,
    };
    let out = arg_value(&args, "--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(format!("{dataset}.xlsx")));

    let store = SqliteStore::new(data_dir);
    let sheets = export_workbook(&store, &dataset, &out)?;
    println!("Exported {sheets} sheets of {dataset} to {}", out.display());
    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}
