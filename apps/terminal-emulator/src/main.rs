//! Terminal Emulator Binary
//!
//! Starts the emulator server over a recorded bar data file.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p terminal-emulator -- path/to/bars.csv
//! ```
//!
//! # Environment Variables
//!
//! - `EMULATOR_DATA_FILE`: Data file path (alternative to the CLI argument)
//! - `EMULATOR_HOST`: Listening host (default: 127.0.0.1)
//! - `EMULATOR_PORT`: Listening port (default: 7498)
//! - `EMULATOR_BAR_DELAY_MS`: Pacing delay between bars (default: 10)
//! - `EMULATOR_UTC_OFFSET_HOURS`: Offset for naive timestamps (default: -5)
//! - `RUST_LOG`: Log level (default: info)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use terminal_emulator::{EmulatorConfig, EmulatorServer, load_bar_series};
use tokio::signal;

/// Graceful shutdown timeout for draining connection tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let data_file = data_file_path().context(
        "no data file given; pass it as the first argument or set EMULATOR_DATA_FILE",
    )?;

    let config = EmulatorConfig::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bar_delay_ms = config.bar_delay.as_millis(),
        data_file = %data_file.display(),
        "Configuration loaded"
    );

    let bars = load_bar_series(&data_file, config.utc_offset)
        .with_context(|| format!("failed to load bars from {}", data_file.display()))?;
    tracing::info!(bars = bars.len(), "Loaded bar data");

    let server = EmulatorServer::bind(&config, Arc::new(bars)).await?;
    let handle = server.handle();

    let server_task = tokio::spawn(server.run());

    await_shutdown().await;
    handle.shutdown();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.stopped())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Connection tasks did not drain in time"
        );
    }
    server_task.await??;

    tracing::info!("Emulator stopped");
    Ok(())
}

/// Data file path from the first CLI argument or the environment.
fn data_file_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("EMULATOR_DATA_FILE").ok())
        .map(PathBuf::from)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
