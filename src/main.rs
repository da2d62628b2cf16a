// =============================================================================
// Depth Recorder: Main Entry Point
// =============================================================================
//
// Subscribes to the partial-depth and aggTrade streams of one USD-M futures
// symbol, enriches every depth snapshot with the trailing one-minute trade
// statistics and appends the result to a CSV file every few seconds.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod error;
mod market_data;
mod persistence;
mod recorder;
mod runtime_config;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::market_data::event_stream::{combined_stream_url, run_market_stream};
use crate::recorder::MarketRecorder;
use crate::runtime_config::RecorderConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = RecorderConfig::load("recorder_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RecorderConfig::default()
    });
    config.apply_env_overrides();
    config.validate()?;

    info!(
        symbol = %config.symbol,
        depth = config.depth_levels,
        flush_interval_secs = config.flush_interval_secs,
        output = %config.output_path,
        "Depth recorder starting"
    );

    // ── 2. Build the pipeline ────────────────────────────────────────────
    let recorder = Arc::new(MarketRecorder::from_config(&config));

    // ── 3. Spawn the market stream ───────────────────────────────────────
    let url = combined_stream_url(
        &config.stream_base_url,
        &config.symbol,
        config.depth_levels,
        config.update_speed_ms,
    );
    let stream_recorder = recorder.clone();
    let stream_task = tokio::spawn(async move {
        loop {
            if let Err(e) = run_market_stream(&url, &stream_recorder).await {
                error!(error = %e, "Market stream error, reconnecting in 5s");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    info!("Recorder running. Press Ctrl+C to stop.");

    // ── 4. Wait for shutdown ─────────────────────────────────────────────
    match config.run_for_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!(secs, "Configured run time elapsed");
                }
                res = tokio::signal::ctrl_c() => res?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }
    warn!("Shutdown signal received, stopping gracefully");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    stream_task.abort();
    let outcome = recorder.shutdown().await?;
    let stats = recorder.writer_stats();

    info!(
        final_rows = outcome.written,
        rows_written = stats.rows_written,
        failed_batches = stats.failed_batches,
        last_flush_at = ?stats.last_flush_at,
        "Depth recorder shut down complete."
    );
    Ok(())
}
