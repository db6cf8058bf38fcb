//! Console and optional file logging.
//!
//! Console output goes through the indicatif layer so progress bars of
//! running downloads are redrawn below log lines instead of being torn.

use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::{AppError, Result};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str =
    "hoard=info,hoard_engine=info,hoard_sources=info,hoard_remote=info,process_utils=warn";

const LOG_FILE_NAME: &str = "hoard.log";

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Filter for the given verbosity flags.
///
/// `-q` wins over `RUST_LOG`; so do `-v` (debug) and `-vv` (trace).
pub fn build_filter(verbose: u8, quiet: bool, env: Option<&str>) -> EnvFilter {
    if quiet {
        return EnvFilter::new("error");
    }
    match verbose {
        0 => env
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER)),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Install the global subscriber.
///
/// With `log_dir` set, a daily-rotated file is written as well; the
/// returned guard must be kept alive until exit so it gets flushed.
pub fn init_logging(verbose: u8, quiet: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(verbose, quiet, env.as_deref());

    let indicatif_layer = IndicatifLayer::new();
    let console = fmt::layer()
        .with_target(verbose > 0)
        .with_timer(LocalTimer)
        .with_writer(indicatif_layer.get_stderr_writer());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                AppError::Logging(format!("creating {}: {e}", dir.display()))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(indicatif_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, true, Some("trace"), "error")]
    #[case(1, false, None, "debug")]
    #[case(3, false, Some("warn"), "trace")]
    #[case(0, false, Some("warn"), "warn")]
    fn flags_pick_the_filter(
        #[case] verbose: u8,
        #[case] quiet: bool,
        #[case] env: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(build_filter(verbose, quiet, env).to_string(), expected);
    }

    #[test]
    fn default_filter_without_env() {
        let filter = build_filter(0, false, None).to_string();
        assert!(filter.contains("hoard=info"));
    }
}
