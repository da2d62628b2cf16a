// =============================================================================
// Market Recorder: Routes events through the window, enricher and writer
// =============================================================================
//
// Thread safety:
//   - The trade window sits behind one parking_lot::Mutex so the FIFO and the
//     four running sums are always read and written together.
//   - The writer manages its own interior locking.
//   - Atomic counters for lock-free progress reporting.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::market_data::{EnrichedSnapshot, SnapshotEnricher, TradeWindow, WindowStats};
use crate::persistence::{BufferedWriter, CsvFileSink, FlushOutcome, WriterOptions, WriterStats};
use crate::runtime_config::RecorderConfig;
use crate::types::MarketEvent;

pub struct MarketRecorder {
    symbol: String,
    window: Mutex<TradeWindow>,
    enricher: SnapshotEnricher,
    writer: BufferedWriter<EnrichedSnapshot>,
    trades_seen: AtomicU64,
    trades_rejected: AtomicU64,
    snapshots_enriched: AtomicU64,
    snapshots_skipped: AtomicU64,
}

impl MarketRecorder {
    pub fn new(
        symbol: impl Into<String>,
        window: TradeWindow,
        enricher: SnapshotEnricher,
        writer: BufferedWriter<EnrichedSnapshot>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            window: Mutex::new(window),
            enricher,
            writer,
            trades_seen: AtomicU64::new(0),
            trades_rejected: AtomicU64::new(0),
            snapshots_enriched: AtomicU64::new(0),
            snapshots_skipped: AtomicU64::new(0),
        }
    }

    /// Wire up the full pipeline from configuration. Spawns the writer's
    /// flush task, so it must run inside a Tokio runtime.
    pub fn from_config(config: &RecorderConfig) -> Self {
        let columns = EnrichedSnapshot::columns(config.depth_levels);
        let sink = CsvFileSink::new(&config.output_path, columns);
        let writer = BufferedWriter::spawn(
            sink,
            WriterOptions {
                flush_interval: Duration::from_secs(config.flush_interval_secs),
                dedup: config.dedup,
                on_write_failure: config.on_write_failure,
            },
        );

        info!(
            symbol = %config.symbol,
            output = %config.output_path,
            warmup_secs = config.warmup_secs,
            "market recorder ready"
        );

        Self::new(
            config.symbol.clone(),
            TradeWindow::new(config.window_ms),
            SnapshotEnricher::new(Duration::from_secs(config.warmup_secs), config.depth_levels),
            writer,
        )
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Process one inbound event.
    ///
    /// Trades go into the window; book updates are enriched with the window
    /// statistics and queued for persistence once the warm-up has passed.
    ///
    /// A trade the window cannot admit is logged and skipped; the window
    /// still advances to its timestamp.
    pub fn handle_event(&self, event: MarketEvent) {
        let now = event.timestamp();
        match event {
            MarketEvent::Trade(trade) => {
                let (admitted, evicted, retained) = {
                    let mut window = self.window.lock();
                    let admitted = window.add_trade(trade);
                    let evicted = window.evict_expired(now);
                    (admitted, evicted, window.len())
                };
                if evicted > 0 {
                    debug!(evicted, retained, "trades expired from window");
                }
                match admitted {
                    Ok(()) => {
                        self.trades_seen.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let rejected = self.trades_rejected.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            error = %e,
                            price = %trade.price,
                            volume = %trade.volume,
                            rejected,
                            "trade rejected"
                        );
                    }
                }
            }
            MarketEvent::BookUpdate(book) => {
                let enriched = {
                    let mut window = self.window.lock();
                    window.evict_expired(now);
                    self.enricher.enrich(book, &window)
                };
                match enriched {
                    Some(snapshot) => {
                        self.writer.append(snapshot);
                        self.snapshots_enriched.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        let skipped = self.snapshots_skipped.fetch_add(1, Ordering::Relaxed) + 1;
                        debug!(skipped, "book update dropped during warm-up");
                    }
                }
            }
        }
    }

    /// Consistent snapshot of the current window statistics.
    pub fn window_stats(&self) -> WindowStats {
        self.window.lock().stats()
    }

    pub fn trades_seen(&self) -> u64 {
        self.trades_seen.load(Ordering::Relaxed)
    }

    pub fn trades_rejected(&self) -> u64 {
        self.trades_rejected.load(Ordering::Relaxed)
    }

    pub fn snapshots_enriched(&self) -> u64 {
        self.snapshots_enriched.load(Ordering::Relaxed)
    }

    pub fn snapshots_skipped(&self) -> u64 {
        self.snapshots_skipped.load(Ordering::Relaxed)
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    /// Stop the writer and flush everything still buffered.
    pub async fn shutdown(&self) -> Result<FlushOutcome> {
        let stats = self.window_stats();
        info!(
            symbol = %self.symbol,
            avg_buy_price = %stats.avg_buy_price,
            avg_sell_price = %stats.avg_sell_price,
            trades = self.trades_seen(),
            rejected = self.trades_rejected(),
            snapshots = self.snapshots_enriched(),
            skipped = self.snapshots_skipped(),
            "shutting down market recorder"
        );
        self.writer.stop().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
