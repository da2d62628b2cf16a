// =============================================================================
// Snapshot Enricher: Attaches window statistics to depth snapshots
// =============================================================================

use std::time::{Duration, Instant};

use crate::market_data::trade_window::{TradeWindow, WindowStats};
use crate::persistence::CsvRow;
use crate::types::{BookLevel, BookSnapshot};

/// Statistic columns appended after the book levels.
const STAT_COLUMNS: [&str; 4] = ["b1m", "a1m", "bv1m", "av1m"];

/// Header fields that precede the book levels.
const BOOK_HEADER_COLUMNS: [&str; 7] = ["e", "E", "T", "s", "U", "u", "pu"];

/// A depth snapshot plus the trade-window statistics read at enrichment time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnrichedSnapshot {
    pub book: BookSnapshot,
    pub stats: WindowStats,
    /// Number of levels per side laid out in the row.
    pub depth: usize,
}

impl EnrichedSnapshot {
    /// Column names for a row with `depth` levels per side:
    /// `e,E,T,s,U,u,pu,b1,b1v..bN,bNv,a1,a1v..aN,aNv,b1m,a1m,bv1m,av1m`.
    pub fn columns(depth: usize) -> Vec<String> {
        let mut cols: Vec<String> = BOOK_HEADER_COLUMNS.iter().map(|c| c.to_string()).collect();
        for side in ["b", "a"] {
            for i in 1..=depth {
                cols.push(format!("{side}{i}"));
                cols.push(format!("{side}{i}v"));
            }
        }
        cols.extend(STAT_COLUMNS.iter().map(|c| c.to_string()));
        cols
    }
}

fn push_levels(row: &mut Vec<String>, levels: &[BookLevel], depth: usize) {
    for i in 0..depth {
        match levels.get(i) {
            Some(level) => {
                row.push(level.price.to_string());
                row.push(level.qty.to_string());
            }
            None => {
                row.push(String::new());
                row.push(String::new());
            }
        }
    }
}

impl CsvRow for EnrichedSnapshot {
    fn to_row(&self) -> Vec<String> {
        let b = &self.book;
        let mut row = Vec::with_capacity(BOOK_HEADER_COLUMNS.len() + self.depth * 4 + 4);
        row.push(b.event_type.clone());
        row.push(b.event_time.to_string());
        row.push(b.transaction_time.to_string());
        row.push(b.symbol.clone());
        row.push(b.first_update_id.to_string());
        row.push(b.final_update_id.to_string());
        row.push(b.prev_final_update_id.to_string());

        push_levels(&mut row, &b.bids, self.depth);
        push_levels(&mut row, &b.asks, self.depth);

        row.push(self.stats.avg_buy_price.to_string());
        row.push(self.stats.avg_sell_price.to_string());
        row.push(self.stats.total_buy_volume.to_string());
        row.push(self.stats.total_sell_volume.to_string());
        row
    }
}

/// Gates enrichment behind a warm-up period so the window has time to fill.
pub struct SnapshotEnricher {
    started_at: Instant,
    warmup: Duration,
    depth: usize,
}

impl SnapshotEnricher {
    pub fn new(warmup: Duration, depth: usize) -> Self {
        Self::with_start(Instant::now(), warmup, depth)
    }

    pub fn with_start(started_at: Instant, warmup: Duration, depth: usize) -> Self {
        Self {
            started_at,
            warmup,
            depth,
        }
    }

    pub fn is_warm(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) >= self.warmup
    }

    /// Enrich `book` with the current window statistics, or drop it (`None`)
    /// while still warming up.
    pub fn enrich(&self, book: BookSnapshot, window: &TradeWindow) -> Option<EnrichedSnapshot> {
        self.enrich_at(book, window, Instant::now())
    }

    pub fn enrich_at(
        &self,
        book: BookSnapshot,
        window: &TradeWindow,
        now: Instant,
    ) -> Option<EnrichedSnapshot> {
        if !self.is_warm(now) {
            return None;
        }

        Some(EnrichedSnapshot {
            book,
            stats: window.stats(),
            depth: self.depth,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
