use anyhow::{Result, Context};
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use std::path::PathBuf;
use std::fs;

/// Build the log filter: RUST_LOG first, then the crate level
fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("comment_crawler={}", level).parse()?)
        .add_directive("warn".parse()?);

    Ok(filter)
}

/// Initialize the logging system
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = env_filter(verbose)?;

    // Configure the logging format
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    if let Some(log_file) = log_file {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create log directory: {}", parent.display()))?;
        }

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context(format!("Failed to open log file: {}", log_file.display()))?;
        let file_layer = fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    Ok(())
}
