// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ServiceConfig;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_FILTER: &str = "usage_service=info,usage_sys=info,warn";
const LOG_PREFIX: &str = "quick-usage.log";
const KEEP_DAYS: u64 = 7;

/// Log to stderr, and to a daily rolling file when `log_dir` is configured.
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init(config: &ServiceConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = config.log_filter.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directives).unwrap_or_else(|error| {
            eprintln!("quick-usage: invalid log filter {directives:?}: {error}");
            EnvFilter::new(DEFAULT_FILTER)
        })
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let Some(dir) = config.log_dir.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        return;
    };

    match file_writer(dir) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            // Keep the background writer alive for the whole process.
            let _ = LOG_GUARD.set(guard);
        }
        Err(error) => {
            eprintln!("quick-usage: failed to initialize file logging: {error:#}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn file_writer(
    dir: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir).map_err(|error| {
        anyhow::anyhow!("create log directory failed: {} ({error})", dir.display())
    })?;

    cleanup_old_logs(dir, LOG_PREFIX, KEEP_DAYS);

    let appender = tracing_appender::rolling::daily(dir, LOG_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Remove rolled files older than `keep_days`. Returns how many were removed.
fn cleanup_old_logs(dir: &Path, prefix: &str, keep_days: u64) -> usize {
    let Some(cutoff) =
        SystemTime::now().checked_sub(Duration::from_secs(keep_days * 24 * 60 * 60))
    else {
        return 0;
    };

    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|kind| kind.is_file()) {
            continue;
        }
        // Only touch files created by the rolling appender.
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|metadata| metadata.modified()) else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }
        if fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}
