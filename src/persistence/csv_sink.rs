// =============================================================================
// CSV Sink: Append-only delimited file with a one-time header
// =============================================================================

use std::fs::OpenOptions;
use std::path::PathBuf;

use csv::WriterBuilder;
use tracing::debug;

use crate::error::Result;

/// Durable destination for flushed rows.
pub trait RowSink: Send + 'static {
    fn write_rows(&mut self, rows: &[Vec<String>]) -> Result<()>;
}

/// Appends rows to a CSV file, writing `columns` first whenever the file is
/// new or empty.
pub struct CsvFileSink {
    path: PathBuf,
    columns: Vec<String>,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>, columns: Vec<String>) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }
}

impl RowSink for CsvFileSink {
    fn write_rows(&mut self, rows: &[Vec<String>]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new().from_writer(file);
        if needs_header {
            debug!(path = %self.path.display(), "writing CSV header");
            writer.write_record(&self.columns)?;
        }
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
