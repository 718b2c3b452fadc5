//! Three-tier logging.
//!
//! Three daily-rotated files under the log directory, seven backups each:
//! `debug.log` (everything), `info.log` (info and up), and `unified.log`
//! (info and up, restricted to this crate's own events so HTTP client and
//! runtime noise never reaches it). A stdout layer mirrors info (or debug
//! with `--verbose`).

use anyhow::{Context, Result};
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing::Metadata;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

const RETAINED_LOG_FILES: usize = 7;

/// The unified tier is an allow-list: only events from this crate's own
/// modules pass, which drops per-request HTTP chatter from the client
/// stacks (reqwest, hyper) by construction.
pub fn unified_allows(target: &str, level: &tracing::Level) -> bool {
    if *level > tracing::Level::INFO {
        return false;
    }
    target == "trackstar" || target.starts_with("trackstar::")
}

fn unified_filter(metadata: &Metadata<'_>) -> bool {
    unified_allows(metadata.target(), metadata.level())
}

fn rolling_appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(RETAINED_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to create {} log appender", prefix))
}

/// Install the global subscriber. Call once at startup, after the log
/// directory is known.
pub fn init(log_dir: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let debug_file = rolling_appender(log_dir, "debug")?;
    let info_file = rolling_appender(log_dir, "info")?;
    let unified_file = rolling_appender(log_dir, "unified")?;

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let unified_layer = tracing_subscriber::fmt::layer()
        .with_writer(unified_file)
        .with_ansi(false)
        .with_target(false)
        .with_filter(filter_fn(unified_filter));

    let stdout_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(debug_layer)
        .with(info_layer)
        .with(unified_layer)
        .with(stdout_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
