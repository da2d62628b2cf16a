pub mod enricher;
pub mod event_stream;
pub mod trade_window;

pub use enricher::{EnrichedSnapshot, SnapshotEnricher};
pub use trade_window::{TradeWindow, WindowStats};
