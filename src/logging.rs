use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;
use crate::error::GatewayResult;

const LOG_FILE_PREFIX: &str = "recruit-gateway.log";

/// Initialize tracing: human-readable output on stdout plus JSON lines in a
/// daily-rolled file under the configured logs directory.
///
/// The returned guard must stay alive for the process lifetime; dropping it
/// stops the background log writer.
pub fn init(config: &LogConfig) -> GatewayResult<WorkerGuard> {
    std::fs::create_dir_all(&config.file_path)?;

    let file_appender = tracing_appender::rolling::daily(&config.file_path, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}
