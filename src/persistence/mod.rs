pub mod buffered_writer;
pub mod csv_sink;
pub mod dedup;

use std::hash::Hash;

pub use buffered_writer::{BufferedWriter, FailurePolicy, FlushOutcome, WriterOptions, WriterStats};
pub use csv_sink::{CsvFileSink, RowSink};
pub use dedup::DedupPolicy;

/// A record that can be buffered, deduplicated by value and written as one
/// delimited row.
pub trait CsvRow: Clone + Eq + Hash + Send + 'static {
    /// Field values in declared column order.
    fn to_row(&self) -> Vec<String>;
}
