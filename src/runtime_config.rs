// =============================================================================
// Recorder Configuration: JSON file with per-field defaults
// =============================================================================
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::market_data::trade_window::DEFAULT_WINDOW_MS;
use crate::persistence::{DedupPolicy, FailurePolicy};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "NEIROUSDT".to_string()
}

fn default_depth_levels() -> usize {
    10
}

fn default_update_speed_ms() -> u64 {
    100
}

fn default_window_ms() -> i64 {
    DEFAULT_WINDOW_MS
}

fn default_warmup_secs() -> u64 {
    60
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_output_path() -> String {
    "data1.csv".to_string()
}

fn default_stream_base_url() -> String {
    "wss://fstream.binance.com".to_string()
}

// =============================================================================
// RecorderConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Instrument to record, e.g. `NEIROUSDT`.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Book levels per side subscribed to and written per row.
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,

    /// Depth stream update speed in milliseconds (100, 250 or 500).
    #[serde(default = "default_update_speed_ms")]
    pub update_speed_ms: u64,

    /// Trailing trade window in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,

    /// Book updates arriving earlier than this after start are not recorded.
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,

    /// Seconds between scheduled flushes; must be at least 1.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Destination CSV file.
    #[serde(default = "default_output_path")]
    pub output_path: String,

    #[serde(default = "default_stream_base_url")]
    pub stream_base_url: String,

    #[serde(default)]
    pub dedup: DedupPolicy,

    #[serde(default)]
    pub on_write_failure: FailurePolicy,

    /// Stop on its own after this many seconds; runs until Ctrl+C otherwise.
    #[serde(default)]
    pub run_for_secs: Option<u64>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            depth_levels: default_depth_levels(),
            update_speed_ms: default_update_speed_ms(),
            window_ms: default_window_ms(),
            warmup_secs: default_warmup_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            output_path: default_output_path(),
            stream_base_url: default_stream_base_url(),
            dedup: DedupPolicy::default(),
            on_write_failure: FailurePolicy::default(),
            run_for_secs: None,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recorder config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse recorder config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid recorder config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            output = %config.output_path,
            "recorder config loaded"
        );

        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.flush_interval_secs > 0, "flush_interval_secs must be at least 1");
        ensure!(self.depth_levels > 0, "depth_levels must be at least 1");
        ensure!(self.window_ms > 0, "window_ms must be positive, got {}", self.window_ms);
        ensure!(!self.symbol.trim().is_empty(), "symbol must not be empty");
        Ok(())
    }

    /// Apply `RECORDER_SYMBOL` / `RECORDER_OUTPUT` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("RECORDER_SYMBOL").ok(),
            std::env::var("RECORDER_OUTPUT").ok(),
        );
    }

    fn apply_overrides(&mut self, symbol: Option<String>, output: Option<String>) {
        if let Some(sym) = symbol.map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()) {
            self.symbol = sym;
        }
        if let Some(out) = output.filter(|s| !s.trim().is_empty()) {
            self.output_path = out;
        }
    }
}
