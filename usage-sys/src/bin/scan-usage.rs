// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};
use usage_sys::usage::normalize;
use usage_sys::{UsageComputation, WalkOptions, WalkOutcome};
use usage_types::{bytes_to_pretty, format_count};

#[derive(Debug, Parser)]
#[command(name = "scan-usage")]
#[command(about = "Estimate disk usage of directories with a single throttled walk")]
struct Args {
    /// Directories to measure.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Also report every first-level subdirectory of the given paths.
    #[arg(long)]
    children: bool,

    /// Report filesystem capacity usage instead of walking.
    #[arg(long)]
    aggregate: bool,

    #[arg(long)]
    json: bool,

    /// Walk this many milliseconds before pausing for as long.
    #[arg(long, default_value_t = 100)]
    chunk_ms: u64,

    #[arg(long)]
    same_filesystem: bool,
}

#[derive(Debug, Serialize)]
struct Row {
    path: PathBuf,
    bytes: i64,
    files: u64,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("usage_sys=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = WalkOptions {
        chunk: Duration::from_millis(args.chunk_ms),
        same_filesystem: args.same_filesystem,
        ..WalkOptions::default()
    };

    let rows = Arc::new(Mutex::new(Vec::<Row>::new()));
    let mut computation = UsageComputation::new(options);

    let mut watched = Vec::new();
    for path in &args.paths {
        let path = normalize(path)?;
        if args.children && !args.aggregate {
            for entry in std::fs::read_dir(&path)?.flatten() {
                if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                    watched.push(entry.path());
                }
            }
        }
        watched.push(path);
    }

    for path in &watched {
        let rows = Arc::clone(&rows);
        computation.add_listener(path, move |dir, bytes, files| {
            rows.lock()
                .map_err(|_| anyhow::anyhow!("result table poisoned"))?
                .push(Row {
                    path: dir.to_path_buf(),
                    bytes,
                    files,
                });
            Ok(())
        });
    }

    let summary = if args.aggregate {
        computation.compute_aggregate(&args.paths);
        None
    } else {
        match computation.compute(&args.paths)? {
            WalkOutcome::Completed(summary) => Some(summary),
            WalkOutcome::Cancelled => anyhow::bail!("scan cancelled"),
        }
    };

    let mut rows = std::mem::take(
        &mut *rows
            .lock()
            .map_err(|_| anyhow::anyhow!("result table poisoned"))?,
    );
    rows.sort_by(|left, right| right.bytes.cmp(&left.bytes));

    if args.json {
        let output = serde_json::json!({ "directories": rows, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{:<16} {:>12}  PATH", "SIZE", "FILES");
    println!("----------------------------------------");
    for row in &rows {
        let size = u64::try_from(row.bytes)
            .map(|bytes| bytes_to_pretty(&bytes, false))
            .unwrap_or_else(|_| "unavailable".to_string());
        println!(
            "{:<16} {:>12}  {}",
            size,
            format_count(row.files),
            row.path.display()
        );
    }

    if let Some(summary) = summary {
        println!();
        println!(
            "bytes={} files={} dirs={} skipped_errors={} pauses={} paused_ms={} elapsed_ms={}",
            summary.bytes,
            summary.files,
            summary.dirs,
            summary.skipped_errors,
            summary.throttle_pauses,
            summary.paused.as_millis(),
            summary.elapsed.as_millis()
        );
    }

    Ok(())
}
