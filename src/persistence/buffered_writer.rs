// =============================================================================
// Buffered Writer: Batches records in memory and flushes them periodically
// =============================================================================
//
// Producers call `append`, which only pushes onto the pending batch under a
// short lock. A background task swaps the batch out on every interval tick
// and hands it to the sink on the blocking pool, so slow storage never stalls
// a producer.
//
// Lock order: `store` before `pending`. Producers only ever take `pending`.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::persistence::dedup::{DedupPolicy, RecentHistory};
use crate::persistence::{CsvRow, RowSink};

/// Shortest accepted flush period; `tokio::time::interval` rejects zero.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// What happens to a batch whose write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Discard the batch (at-most-once per flush attempt).
    #[default]
    Drop,
    /// Put the batch back in front of the pending records and retry it on
    /// the next flush.
    Requeue,
}

#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    pub flush_interval: Duration,
    pub dedup: DedupPolicy,
    pub on_write_failure: FailurePolicy,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            dedup: DedupPolicy::default(),
            on_write_failure: FailurePolicy::default(),
        }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub written: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterStats {
    pub rows_written: u64,
    pub duplicates_skipped: u64,
    pub failed_batches: u64,
    pub dropped_records: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

struct Store<R> {
    sink: Box<dyn RowSink>,
    history: RecentHistory<R>,
}

struct Shared<R> {
    pending: Mutex<Vec<R>>,
    store: Mutex<Store<R>>,
    on_write_failure: FailurePolicy,
    rows_written: AtomicU64,
    duplicates_skipped: AtomicU64,
    failed_batches: AtomicU64,
    dropped_records: AtomicU64,
    last_flush_at: Mutex<Option<DateTime<Utc>>>,
}

impl<R: CsvRow> Shared<R> {
    fn flush(&self) -> Result<FlushOutcome> {
        // Holding the store for the whole flush keeps batches in order when
        // the scheduled flush and an explicit one race.
        let mut store = self.store.lock();
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let fresh: Vec<R> = {
            let mut in_batch: HashSet<&R> = HashSet::with_capacity(batch.len());
            batch
                .iter()
                .filter(|r| !store.history.contains(r) && in_batch.insert(*r))
                .cloned()
                .collect()
        };
        let duplicates = batch.len() - fresh.len();
        let rows: Vec<Vec<String>> = fresh.iter().map(|r| r.to_row()).collect();

        if !rows.is_empty() {
            if let Err(e) = store.sink.write_rows(&rows) {
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                match self.on_write_failure {
                    FailurePolicy::Drop => {
                        self.dropped_records
                            .fetch_add(batch.len() as u64, Ordering::Relaxed);
                        warn!(records = batch.len(), "dropping batch after write failure");
                    }
                    FailurePolicy::Requeue => {
                        let mut pending = self.pending.lock();
                        let newer = std::mem::take(&mut *pending);
                        *pending = batch;
                        pending.extend(newer);
                        warn!(records = pending.len(), "batch requeued after write failure");
                    }
                }
                return Err(e);
            }
        }

        for record in fresh {
            store.history.insert(record);
        }

        self.rows_written
            .fetch_add(rows.len() as u64, Ordering::Relaxed);
        self.duplicates_skipped
            .fetch_add(duplicates as u64, Ordering::Relaxed);
        *self.last_flush_at.lock() = Some(Utc::now());
        debug!(
            written = rows.len(),
            duplicates,
            remembered = store.history.len(),
            "batch flushed"
        );

        Ok(FlushOutcome {
            written: rows.len(),
            duplicates,
        })
    }
}

/// Buffered, deduplicating, periodically flushed record writer.
pub struct BufferedWriter<R: CsvRow> {
    shared: Arc<Shared<R>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: CsvRow> BufferedWriter<R> {
    /// Start the writer and its flush task. Must be called inside a Tokio
    /// runtime. A zero `flush_interval` is raised to one millisecond.
    pub fn spawn(sink: impl RowSink, options: WriterOptions) -> Self {
        let period = options.flush_interval.max(MIN_FLUSH_INTERVAL);
        if period != options.flush_interval {
            warn!(?period, "flush interval too short, clamped");
        }

        let shared = Arc::new(Shared {
            pending: Mutex::new(Vec::new()),
            store: Mutex::new(Store {
                sink: Box::new(sink),
                history: RecentHistory::new(options.dedup),
            }),
            on_write_failure: options.on_write_failure,
            rows_written: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            dropped_records: AtomicU64::new(0),
            last_flush_at: Mutex::new(None),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_flush_loop(shared.clone(), period, shutdown_rx));

        Self {
            shared,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue a record for the next flush. Never performs I/O.
    pub fn append(&self, record: R) {
        self.shared.pending.lock().push(record);
    }

    /// Number of records waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Flush the pending batch now, on the calling thread.
    pub fn flush(&self) -> Result<FlushOutcome> {
        self.shared.flush()
    }

    /// Stop the flush task, wait for any in-flight flush, then write whatever
    /// is still pending. Safe to call more than once.
    pub async fn stop(&self) -> Result<FlushOutcome> {
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "flush task terminated abnormally");
            }
        }

        let pending = self.pending_len();
        let outcome = self.flush()?;
        let stats = self.stats();
        info!(
            pending,
            final_rows = outcome.written,
            rows_written = stats.rows_written,
            duplicates_skipped = stats.duplicates_skipped,
            failed_batches = stats.failed_batches,
            "buffered writer stopped"
        );
        Ok(outcome)
    }

    pub fn stats(&self) -> WriterStats {
        let s = &self.shared;
        WriterStats {
            rows_written: s.rows_written.load(Ordering::Relaxed),
            duplicates_skipped: s.duplicates_skipped.load(Ordering::Relaxed),
            failed_batches: s.failed_batches.load(Ordering::Relaxed),
            dropped_records: s.dropped_records.load(Ordering::Relaxed),
            last_flush_at: *s.last_flush_at.lock(),
        }
    }
}

async fn run_flush_loop<R: CsvRow>(
    shared: Arc<Shared<R>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Shutdown wins over a tick that is already due; `stop` flushes
        // whatever is left.
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let s = shared.clone();
                match tokio::task::spawn_blocking(move || s.flush()).await {
                    Ok(Ok(outcome)) if outcome.written > 0 => {
                        info!(rows = outcome.written, duplicates = outcome.duplicates, "flushed batch");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        error!(error = %e, "scheduled flush failed");
                    }
                    Err(e) => {
                        error!(error = %e, "flush task panicked");
                    }
                }
            }
        }
    }
    debug!("flush loop exited");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
