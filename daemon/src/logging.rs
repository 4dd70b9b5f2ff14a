use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maps a configured level name to a tracing level.  Accepts the usual
/// names in any case plus `WARNING`/`CRITICAL`/`FATAL`; anything else
/// falls back to DEBUG so a typo never hides output.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" | "CRITICAL" | "FATAL" => Level::ERROR,
        _ => Level::DEBUG,
    }
}

/// Installs the global subscriber: a compact console layer plus a plain-text
/// file layer appending to `log_file`.
///
/// Filter precedence is the `--log-level` override, then `RUST_LOG`, then the
/// level stored in settings.
pub fn init(override_level: Option<&str>, configured_level: &str, log_file: &Path) -> anyhow::Result<()> {
    let filter = match override_level {
        Some(level) => level_filter(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(configured_level)),
    };

    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}

fn level_filter(name: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(parse_level(name)).into())
        .parse_lossy("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_common_names() {
        assert_eq!(parse_level("INFO"), Level::INFO);
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level(" Warning "), Level::WARN);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("CRITICAL"), Level::ERROR);
        assert_eq!(parse_level("trace"), Level::TRACE);
    }

    #[test]
    fn parse_level_falls_back_to_debug() {
        assert_eq!(parse_level("LOUD"), Level::DEBUG);
        assert_eq!(parse_level(""), Level::DEBUG);
    }

    #[test]
    fn level_filter_caps_at_parsed_level() {
        let filter = level_filter("WARNING");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }
}
