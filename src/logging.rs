/// Logging setup with background file rotation and multi-layer tracing.
///
/// Two outputs: a compact stdout layer for the terminal and a daily
/// rotated text file under `<data_dir>/logs/`. `RUST_LOG` controls the
/// filter (default "info").

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber. Call once at startup.
pub fn init_logging<P: AsRef<Path>>(data_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = data_dir.as_ref().join("logs");
    std::fs::create_dir_all(&log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let file_appender = tracing_appender::rolling::daily(&log_path, "golamv2.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_filter(env_filter);

    let stdout_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let stdout_layer = fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(stdout_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();

    // The guard must outlive the program for the background writer to flush.
    Box::leak(Box::new(file_guard));

    tracing::info!("Logging initialized, files under {}", log_path.display());

    Ok(())
}
