// =============================================================================
// Shared market types used across the recorder
// =============================================================================

use rust_decimal::Decimal;

/// A single aggregated trade print, immutable once admitted to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TradeRecord {
    /// Exchange event time in milliseconds.
    pub timestamp: i64,
    pub price: Decimal,
    pub volume: Decimal,
    /// Buyer was the maker, i.e. the aggressor sold.
    pub is_sell: bool,
}

impl TradeRecord {
    pub fn new(timestamp: i64, price: Decimal, volume: Decimal, is_sell: bool) -> Self {
        Self {
            timestamp,
            price,
            volume,
            is_sell,
        }
    }
}

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BookLevel {
    pub price: Decimal,
    pub qty: Decimal,
}

/// Partial-depth snapshot as delivered by the USD-M futures depth stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookSnapshot {
    pub event_type: String,
    pub event_time: i64,
    pub transaction_time: i64,
    pub symbol: String,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub prev_final_update_id: u64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Typed inbound event from the exchange connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    Trade(TradeRecord),
    BookUpdate(BookSnapshot),
}

impl MarketEvent {
    /// Exchange timestamp that drives the window reference time.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Trade(t) => t.timestamp,
            Self::BookUpdate(b) => b.transaction_time,
        }
    }
}

impl std::fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trade(_) => write!(f, "aggTrade"),
            Self::BookUpdate(_) => write!(f, "depthUpdate"),
        }
    }
}
